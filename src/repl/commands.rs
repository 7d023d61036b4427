use std::error::Error;

use crate::storage::{layout::*, Structure};

/// Commands that are not part of the statement language.
///
/// These inspect or maintain the open database as a whole
#[derive(Debug, Clone, PartialEq)]
pub enum MetaCommand {
    /// Close the current REPL session
    Exit,
    /// Prints out layout information
    Layout,
    /// Lists every table with its record count
    Tables,
    Count(String),
    /// Rebuilds the indexes of every table
    Rebuild { aggressive: bool },
    /// Compacts one table
    Defrag(String),
}

impl MetaCommand {
    pub fn execute(&self, structure: &mut Structure) -> Result<(), Box<dyn Error>> {
        match self {
            Self::Exit => Ok(()),
            Self::Layout => {
                println!("=== Structure file ===");
                println!("Header size: {}", STRUCTURE_HEADER_SIZE);
                println!("Version: {}", STRUCTURE_VERSION);
                println!();

                println!("=== Table file ===");
                println!("Page size: {}", PAGE_SIZE);
                println!("Header size: {}", TABLE_HEADER_SIZE);
                println!("Slot overhead: {}", SLOT_OVERHEAD);
                println!("Footer size: {}", FOOTER_SIZE);

                Ok(())
            }
            Self::Tables => {
                for table in structure.database()?.tables() {
                    match table.needs_rebuild() {
                        Some(reason) => println!(
                            "{} ({}) needs rebuild: {}",
                            table.name(),
                            table.count(),
                            reason
                        ),
                        None => println!("{} ({})", table.name(), table.count()),
                    }
                }
                Ok(())
            }
            Self::Count(name) => {
                println!("{}", structure.database()?.table(name)?.count());
                Ok(())
            }
            Self::Rebuild { aggressive } => {
                for (name, report) in structure.rebuild_indexes(*aggressive)? {
                    println!(
                        "{}: {} live, {} salvaged, {} lost",
                        name, report.live, report.salvaged, report.lost
                    );
                }
                Ok(())
            }
            Self::Defrag(name) => {
                let report = structure.database()?.table_mut(name)?.defragment()?;
                println!("{}: {} live", name, report.live);
                Ok(())
            }
        }
    }
}

impl TryInto<MetaCommand> for &str {
    type Error = String;

    fn try_into(self) -> Result<MetaCommand, Self::Error> {
        let mut words = self.split_whitespace();
        let command = match (words.next(), words.next(), words.next()) {
            (Some(".exit"), None, _) => MetaCommand::Exit,
            (Some(".layout"), None, _) => MetaCommand::Layout,
            (Some(".tables"), None, _) => MetaCommand::Tables,
            (Some(".count"), Some(table), None) => MetaCommand::Count(table.to_string()),
            (Some(".rebuild"), None, _) => MetaCommand::Rebuild { aggressive: false },
            (Some(".rebuild"), Some("aggressive"), None) => {
                MetaCommand::Rebuild { aggressive: true }
            }
            (Some(".defrag"), Some(table), None) => MetaCommand::Defrag(table.to_string()),
            _ => return Err(format!("unknown command `{self}`.")),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(input: &str) -> Result<MetaCommand, String> {
        input.try_into()
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(parse(".count Mail"), Ok(MetaCommand::Count("Mail".into())));
        assert_eq!(
            parse(".rebuild aggressive"),
            Ok(MetaCommand::Rebuild { aggressive: true })
        );
        assert_eq!(parse(".rebuild"), Ok(MetaCommand::Rebuild { aggressive: false }));
    }

    #[test]
    fn rejects_unknown_or_malformed() {
        assert!(parse(".count").is_err());
        assert!(parse(".rebuild gently").is_err());
        assert!(parse(".drop Mail").is_err());
    }
}
