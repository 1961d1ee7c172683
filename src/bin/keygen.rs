#![forbid(unsafe_code)]

//! Stand-alone identity provisioning tool: creates (or opens) the node's
//! keystore under a data directory and prints its public key as hex.

use marketmesh::core::security::keystore::Keystore;

fn main() {
    let data_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());

    let keystore = match Keystore::open(&data_dir) {
        Ok(ks) => ks,
        Err(e) => {
            eprintln!("keystore init failed: {e}");
            std::process::exit(1);
        }
    };

    println!("{}", hex::encode(keystore.public_key()));
}
