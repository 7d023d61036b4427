use std::error::Error;

use crate::storage::Structure;

/// Database statements
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Prints every live record of a table
    Select(String),
}

impl Statement {
    pub fn execute(&self, structure: &mut Structure) -> Result<(), Box<dyn Error>> {
        match self {
            Self::Select(name) => {
                let table = structure.database()?.table(name)?;
                for record in table.records() {
                    println!("{}", record?);
                }
                Ok(())
            }
        }
    }
}

impl TryFrom<&str> for Statement {
    type Error = String;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        let words: Vec<&str> = input.split_whitespace().collect();
        match words.as_slice() {
            ["select", table] => Ok(Self::Select(table.to_string())),
            ["select"] => Err("select requires a table name".to_string()),
            _ => Err(format!("unrecognized statement `{input}`")),
        }
    }
}
