use std::io::{self, BufRead, Write};

use minirel::{Engine, QueryResult};

fn main() {
    env_logger::init();

    let data_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data".to_string());

    let mut engine = match Engine::new(&data_dir) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to open data directory {}: {}", data_dir, e);
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buffer = String::new();

    loop {
        if buffer.is_empty() {
            print!("minirel> ");
        } else {
            print!("      -> ");
        }
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        buffer.push_str(&line);

        // Statements end with a semicolon; keep reading until one shows up
        if !buffer.contains(';') {
            continue;
        }
        let text = std::mem::take(&mut buffer);

        let statements = match minirel::sql::parse(text.trim()) {
            Ok(statements) => statements,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        for stmt in statements {
            match engine.execute(stmt) {
                Ok(result) => {
                    if print_result(&result) {
                        return;
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }
}

/// Render one result; returns true when the session should end
fn print_result(result: &QueryResult) -> bool {
    match result {
        QueryResult::Done => false,
        QueryResult::Affected(n) => {
            println!("{} row(s) affected", n);
            false
        }
        QueryResult::Rows(headers, rows) => {
            println!("{}", headers.join(","));
            for row in rows {
                println!("{}", row.join(","));
            }
            println!("{} row(s)", rows.len());
            false
        }
        QueryResult::Batch(results) => results.iter().any(print_result),
        QueryResult::Exit => {
            println!("bye");
            true
        }
    }
}
