pub mod app;
pub mod assembly;
pub mod cancel;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod genome;
pub mod inference;
pub mod intake;
pub mod layout;
pub mod organisms;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod reference;
pub mod registry;
pub mod sample_table;
pub mod snakemake;
pub mod stages;
pub mod validate;
