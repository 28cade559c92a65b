//! File-backed input stream.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::stream::{InStream, StreamError};

/// Read-only file stream. End of file surfaces as [`StreamError::Closed`],
/// which is how parsers observe end-of-data.
pub struct FileInStream {
    file: File,
    name: String,
}

impl FileInStream {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file,
            name: path.display().to_string(),
        })
    }
}

impl InStream for FileInStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn do_read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        match (&self.file).read(buf) {
            Ok(0) => Err(StreamError::Closed),
            Ok(n) => Ok(n),
            Err(_) => Err(StreamError::Io),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamReader;
    use std::io::Write;

    #[test]
    fn reads_file_contents() {
        let mut path = std::env::temp_dir();
        path.push("xynq_file_stream.test");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(b"(key 325)").unwrap();
        }

        let stream = FileInStream::open(&path).unwrap();
        let mut buf = [0u8; 4];
        let mut reader = StreamReader::new(&mut buf, &stream);

        let mut collected = Vec::new();
        while let Ok(chunk) = reader.drain_or_read() {
            collected.extend_from_slice(chunk);
        }
        assert_eq!(collected, b"(key 325)");
        assert!(!reader.is_good()); // closed at EOF

        let _ = std::fs::remove_file(&path);
    }
}
