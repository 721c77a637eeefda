//! Interactive operator console for a REC Active BMS.
//!
//! Reads command lines from stdin and submits them through the operator
//! endpoint: a first token ending in `?` is a query whose response is
//! printed (with a hex dump of each raw frame); any other line is sent
//! fire-and-forget. Type `quit` to exit.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p recbms --example operator_console
//! ```
//!
//! Example session:
//!
//! ```text
//! > BVOL?
//! BVOL  13.42
//!       raw: 550002000531332e343207acaa
//! > RAZL 1
//! RAZL  sent, no response expected
//! ```

use std::io::{self, BufRead, Write};

use recbms::{Error, RecBms};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let bms = RecBms::builder().build().await?;
    println!("Connected: BMS serial {}", bms.identify().await?);
    println!("Enter commands (e.g. BVOL?, CELL?, RAZL 1). Type quit to exit.\n");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") {
            break;
        }

        match bms.operator_command(line).await {
            Ok(result) if result.expected_response => {
                match &result.response {
                    Some(parsed) => println!("{:<5} {}", result.tag, parsed.data),
                    None => println!("{:<5} (unparsed)", result.tag),
                }
                for dump in &result.frames_hex {
                    println!("      raw: {}", dump);
                }
            }
            Ok(result) => {
                println!("{:<5} sent, no response expected", result.tag);
            }
            Err(Error::UnknownTag(tag)) => {
                println!("unknown command tag: {}", tag);
            }
            Err(Error::CommandTimeout { tag, elapsed_ms }) => {
                println!("{} response timed out after {} ms", tag, elapsed_ms);
            }
            Err(e) => {
                println!("error: {}", e);
            }
        }
    }

    bms.close().await?;
    Ok(())
}
