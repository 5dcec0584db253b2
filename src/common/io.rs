//! Common, IO-related code.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use flate2::bufread::MultiGzDecoder;

/// Transparently open a file with gzip decoder.
pub fn open_read_maybe_gz<P>(path: P) -> Result<Box<dyn BufRead>, anyhow::Error>
where
    P: AsRef<Path>,
{
    if path.as_ref().extension().map(|s| s.to_str()) == Some(Some("gz")) {
        tracing::trace!("Opening {:?} as gzip for reading", path.as_ref());
        let file = File::open(path)?;
        let bufreader = BufReader::new(file);
        let decoder = MultiGzDecoder::new(bufreader);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        tracing::trace!("Opening {:?} as plain text for reading", path.as_ref());
        let file = File::open(path).map(BufReader::new)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};

    use flate2::{write::GzEncoder, Compression};

    #[rstest::rstest]
    #[case(false)]
    #[case(true)]
    fn open_read_maybe_gz(#[case] is_gzip: bool) -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let filename = if is_gzip { "test.txt.gz" } else { "test.txt" };
        let path = tmp_dir.join(filename);

        if is_gzip {
            let file = std::fs::File::create(&path)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(b"hello\n")?;
            encoder.finish()?;
        } else {
            std::fs::write(&path, b"hello\n")?;
        }

        let mut reader = super::open_read_maybe_gz(&path)?;
        let mut buf = String::new();
        reader.read_to_string(&mut buf)?;
        assert_eq!(buf, "hello\n");

        Ok(())
    }
}
