use std::path::PathBuf;

use clap::Parser;
use flatdb::start_repl;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Name of the database to open
    name: Option<String>,

    /// Directory holding the database files
    #[arg(short, long, value_name = "DIR")]
    dir: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let name = cli.name.unwrap_or("db".into());
    let dir = cli.dir.unwrap_or(".".into());

    if let Err(e) = start_repl(name, dir) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
