use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// BLAKE3 digest of the full byte stream, hex encoded.
///
/// This is the deduplication key for encounters: it never looks at the file
/// name or at the parsed content.
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

pub fn read_full_file(file: &Path) -> io::Result<Vec<u8>> {
    let mut f = File::open(file)?;
    let mut buffer = Vec::new();
    f.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Streaming variant of [`content_hash`] for files on disk.
pub fn hash_file(file: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut f = File::open(file)?;
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
