use std::fs::File;
use std::io::{self, Read, Write};

use reqwest::blocking::Client;
use reqwest::header::RANGE;
use tracing::{debug, info};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{FetchOutcome, PartLocation};
use crate::error::PkgError;
use crate::staging::StagingStore;

/// Copy buffer for piece transfers and merging.
pub const CHUNK_SIZE: usize = 2048 * 2048;

pub struct PieceStream {
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

pub trait PieceSource: Send + Sync {
    fn open(&self, url: &str) -> Result<PieceStream, PkgError>;
}

#[derive(Clone)]
pub struct HttpPieceSource {
    client: Client,
}

impl HttpPieceSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl PieceSource for HttpPieceSource {
    fn open(&self, url: &str) -> Result<PieceStream, PkgError> {
        // The CDN does not stream reliably unless an explicit range is asked for.
        let response = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-")
            .send()
            .map_err(|err| PkgError::Transfer {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(PkgError::TransferStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(PieceStream {
            content_length: response.content_length(),
            reader: Box::new(response),
        })
    }
}

pub struct PieceFetcher<S: PieceSource> {
    source: S,
    store: StagingStore,
}

impl<S: PieceSource> PieceFetcher<S> {
    pub fn new(source: S, store: StagingStore) -> Self {
        Self { source, store }
    }

    pub fn store(&self) -> &StagingStore {
        &self.store
    }

    pub fn fetch(
        &self,
        location: &PartLocation,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutcome, PkgError> {
        let piece = self.store.staged_piece(location)?;
        if piece.final_path.as_std_path().is_file() {
            info!(index = piece.index, path = %piece.final_path, "piece already present");
            sink.event(ProgressEvent::message(
                "phase=Fetch; piece already exists locally, skipped",
            ));
            return Ok(FetchOutcome::AlreadyPresent);
        }

        let stream = self.source.open(&location.url)?;
        let expected = stream.content_length;
        let mut reader = stream.reader;
        debug!(index = piece.index, url = %location.url, ?expected, "starting transfer");

        let mut file = File::create(piece.temp_path.as_std_path())
            .map_err(|err| PkgError::Filesystem(format!("create {}: {err}", piece.temp_path)))?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        sink.event(ProgressEvent::bytes(written, expected));
        loop {
            let read = read_chunk(&mut reader, &mut buffer).map_err(|err| PkgError::Transfer {
                url: location.url.clone(),
                message: err.to_string(),
            })?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(|err| PkgError::Filesystem(format!("write {}: {err}", piece.temp_path)))?;
            written += read as u64;
            sink.event(ProgressEvent::bytes(written, expected));
        }

        if let Some(expected) = expected {
            if written != expected {
                return Err(PkgError::ShortRead {
                    url: location.url.clone(),
                    expected,
                    received: written,
                });
            }
        }

        file.sync_all()
            .map_err(|err| PkgError::Filesystem(format!("sync {}: {err}", piece.temp_path)))?;
        drop(file);
        self.store.promote(&piece)?;
        info!(index = piece.index, bytes = written, path = %piece.final_path, "piece fetched");
        Ok(FetchOutcome::Fetched { bytes: written })
    }
}

/// Fills `buffer` unless the reader runs dry first. Returns the number of
/// bytes read; zero means end of stream.
pub(crate) fn read_chunk<R: Read + ?Sized>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Trickle {
        data: Vec<u8>,
        pos: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.data.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn read_chunk_fills_buffer_from_short_reads() {
        let mut reader = Trickle {
            data: b"abcdef".to_vec(),
            pos: 0,
        };
        let mut buffer = [0u8; 4];
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 4);
        assert_eq!(&buffer, b"abcd");
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 2);
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 0);
    }
}
