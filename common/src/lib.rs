use std::{fs, io};

use base16ct::lower::encode_string;
use sha2::{Digest, Sha256};

pub mod data;
pub mod helpers;
pub mod payloads;

pub fn hash_file(mut file: fs::File) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let rv: [u8; 32] = hasher.finalize().into();
    Ok(encode_string(&rv))
}

pub fn hash_bytes(data: &[u8]) -> String {
    let rv: [u8; 32] = Sha256::digest(data).into();
    encode_string(&rv)
}
