pub mod commands;
pub mod statement;

pub use commands::MetaCommand;
pub use statement::Statement;

use std::{
    error::Error,
    io::{self, Write},
    path::PathBuf,
};

use log::info;

use crate::storage::Structure;

/// Starts an inspection session over the database `name` in `dir`.
///
/// Reads commands from stdin until `.exit` or end of input, then flushes.
pub fn start_repl(name: String, dir: PathBuf) -> Result<(), Box<dyn Error>> {
    let mut structure = Structure::new(&dir, name.as_str());
    if !structure.exists() {
        return Err(format!("no database `{name}` in {}", dir.display()).into());
    }
    structure.open_database()?;
    info!("opened {} from {}", name, dir.display());

    let stdin = io::stdin();
    loop {
        print!("{name} > ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let outcome = if input.starts_with('.') {
            let result: Result<MetaCommand, _> = input.try_into();
            match result {
                Ok(MetaCommand::Exit) => break,
                Ok(command) => command.execute(&mut structure),
                Err(e) => Err(e.into()),
            }
        } else {
            Statement::try_from(input)
                .map_err(Into::into)
                .and_then(|statement| statement.execute(&mut structure))
        };

        if let Err(e) = outcome {
            println!("error: {e}");
        }
    }

    structure.shutdown()?;
    Ok(())
}
