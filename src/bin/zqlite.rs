use std::io::Read;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use zqlite::{Database, ExecResult, Value, ZqError};

/// Exit codes: 0 success, 1 SQL error, 2 I/O error, 3 usage error.
const EXIT_SQL_ERROR: i32 = 1;
const EXIT_IO_ERROR: i32 = 2;
const EXIT_USAGE: i32 = 3;

#[derive(Parser)]
#[command(name = "zqlite", about = "ZQLite - embedded SQL database")]
struct Cli {
    /// Path to the database file
    db_path: PathBuf,

    /// Execute SQL and exit (reads standard input when omitted)
    #[arg(short = 'c', long = "command")]
    command: Option<String>,

    /// Create the database file if it does not exist
    #[arg(long)]
    create: bool,
}

fn main() {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(EXIT_USAGE);
        }
    };

    let sql = match &cli.command {
        Some(sql) => sql.clone(),
        None => {
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("zqlite: failed to read standard input: {}", e);
                process::exit(EXIT_IO_ERROR);
            }
            buf
        }
    };
    if sql.trim().is_empty() {
        eprintln!("zqlite: no SQL given");
        process::exit(EXIT_USAGE);
    }

    let db = match open_database(&cli) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("zqlite: {}", e);
            process::exit(exit_code_for(&e));
        }
    };
    let mut conn = db.connect();

    match conn.execute_script(&sql) {
        Ok(results) => {
            for result in results {
                print_result(&result);
            }
        }
        Err(e) => {
            eprintln!("zqlite: {}", e);
            process::exit(exit_code_for(&e));
        }
    }
}

fn open_database(cli: &Cli) -> Result<Database, ZqError> {
    if cli.create {
        Database::open_or_create(&cli.db_path)
    } else {
        Database::open(&cli.db_path)
    }
}

fn exit_code_for(err: &ZqError) -> i32 {
    match err {
        ZqError::Io(_) => EXIT_IO_ERROR,
        _ => EXIT_SQL_ERROR,
    }
}

fn print_result(result: &ExecResult) {
    match result {
        ExecResult::Rows(rows) => {
            for row in rows {
                let line: Vec<String> = row
                    .values
                    .iter()
                    .map(|(_, v)| match v {
                        Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .collect();
                println!("{}", line.join("|"));
            }
        }
        ExecResult::RowsAffected(_) | ExecResult::Ok => {}
    }
}
