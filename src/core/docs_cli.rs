//! Documentation CLI for the embedded guides.
//!
//! `hive docs list` shows what is available, `hive docs show <name>` prints a
//! guide (e.g. `build-secrets`).

use crate::core::{assets, error};
use clap::Subcommand;

/// CLI structure for `hive docs` command
#[derive(clap::Args, Debug)]
pub struct DocsCli {
    #[clap(subcommand)]
    pub command: DocsCommand,
}

#[derive(Subcommand, Debug)]
pub enum DocsCommand {
    /// List embedded guides.
    List,
    /// Display the content of a guide.
    Show {
        #[clap(value_parser)]
        name: String,
    },
}

pub fn run_docs_cli(cli: DocsCli) -> Result<(), error::HiveError> {
    match cli.command {
        DocsCommand::List => {
            println!("Embedded Hive guides:");
            for doc in assets::list_docs() {
                println!("- {}", doc);
            }
            Ok(())
        }
        DocsCommand::Show { name } => match assets::get_embedded_doc(&name) {
            Some(content) => {
                println!("{}", content);
                Ok(())
            }
            None => Err(error::HiveError::NotFound(format!(
                "Document not found: {} (available: {})",
                name,
                assets::list_docs().join(", ")
            ))),
        },
    }
}
