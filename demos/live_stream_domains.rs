//! Polls a single CT log for new entries and prints the DNS identities of
//! each one, without any of the persistence or consistency-checking the
//! full monitor does. Good for a quick look at what a log is issuing.

use futures::StreamExt;

use ctmonitor::decode::decode_entry;
use ctmonitor::wire;

#[tokio::main]
async fn main() {
    env_logger::init();

    if std::env::args_os().len() != 1 {
        eprintln!("Expected no arguments.");
        std::process::exit(1);
    }

    // Google's CT log updates quickly, which makes it a good one to watch live.
    let base_url: reqwest::Url = "https://ct.googleapis.com/logs/us1/argon2025h2/"
        .parse()
        .unwrap();
    let client = wire::new_http_client().expect("could not build HTTP client");

    let mut next_index = match wire::get_sth(&client, &base_url).await {
        Ok(sth) => sth.tree_size,
        Err(e) => {
            eprintln!("could not fetch initial STH: {}", e);
            std::process::exit(1);
        }
    };

    loop {
        let sth = match wire::get_sth(&client, &base_url).await {
            Ok(sth) => sth,
            Err(e) => {
                eprintln!("error fetching STH: {}", e);
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }
        };

        if sth.tree_size > next_index {
            let mut stream = Box::pin(wire::get_entries_stream(&client, &base_url, next_index, sth.tree_size, 64));
            while let Some(item) = stream.next().await {
                match item {
                    Ok((index, entry)) => {
                        match decode_entry(&entry.leaf_input, &entry.extra_data) {
                            Ok(decoded) => {
                                let names: Vec<&str> = decoded.dns_identities.iter().map(|s| s.as_str()).collect();
                                println!("{}: {}", index, names.join(", "));
                            }
                            Err(e) => eprintln!("{}: could not decode entry: {}", index, e),
                        }
                        next_index = index + 1;
                    }
                    Err(e) => {
                        eprintln!("error fetching entries: {}", e);
                        break;
                    }
                }
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    }
}
