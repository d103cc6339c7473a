//! Protocol data units: reassembled message bodies.
//!
//! A PDU starts as an in-memory buffer. When reassembly outgrows the
//! in-memory budget the PDU promotes itself onto a temp file, once, and
//! never reverses. The two representations are a closed enum, so a PDU can
//! never be both in memory and on disk.

use std::io::{self, Read, Seek, SeekFrom, Write};

use tempfile::NamedTempFile;

use crate::errors::PduError;

/// A message body, either buffered in memory or spilled to a temp file.
///
/// Reading drains from the head. The backing temp file of a spilled PDU is
/// unlinked when the PDU is dropped.
#[derive(Debug)]
pub struct Pdu {
    repr: Repr,
}

#[derive(Debug)]
enum Repr {
    Buf { data: Vec<u8>, pos: usize },
    File { file: NamedTempFile, len: u64, pos: u64 },
}

impl Pdu {
    /// New empty in-memory PDU.
    #[must_use]
    pub fn new() -> Self {
        Self { repr: Repr::Buf { data: Vec::new(), pos: 0 } }
    }

    /// In-memory PDU holding `data`.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self { repr: Repr::Buf { data: data.into(), pos: 0 } }
    }

    /// Bytes not yet drained by [`Pdu::read`]. O(1) for both
    /// representations.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Buf { data, pos } => data.len() - pos,
            Repr::File { len, pos, .. } => (len - pos) as usize,
        }
    }

    /// True when no undrained bytes remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the PDU has been promoted onto a temp file.
    #[must_use]
    pub fn is_spilled(&self) -> bool {
        matches!(self.repr, Repr::File { .. })
    }

    /// Promote the PDU onto `file`.
    ///
    /// Existing buffered bytes are written out and the buffer is released;
    /// subsequent appends go straight to the file.
    ///
    /// # Errors
    ///
    /// [`PduError::AlreadySpilled`] if promotion already happened; a PDU
    /// spills at most once.
    pub fn spill_into(&mut self, mut file: NamedTempFile) -> Result<(), PduError> {
        let Repr::Buf { data, pos } = &mut self.repr else {
            return Err(PduError::AlreadySpilled);
        };
        file.as_file_mut().write_all(data)?;
        let len = data.len() as u64;
        let pos = *pos as u64;
        self.repr = Repr::File { file, len, pos };
        Ok(())
    }

    /// Reset the read position to the head.
    pub fn rewind(&mut self) {
        match &mut self.repr {
            Repr::Buf { pos, .. } => *pos = 0,
            Repr::File { pos, .. } => *pos = 0,
        }
    }
}

impl Default for Pdu {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for Pdu {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.repr {
            Repr::Buf { data, .. } => {
                data.extend_from_slice(buf);
                Ok(buf.len())
            },
            Repr::File { file, len, .. } => {
                let f = file.as_file_mut();
                f.seek(SeekFrom::End(0))?;
                let n = f.write(buf)?;
                *len += n as u64;
                Ok(n)
            },
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.repr {
            Repr::Buf { .. } => Ok(()),
            Repr::File { file, .. } => file.as_file_mut().flush(),
        }
    }
}

impl Read for Pdu {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        match &mut self.repr {
            Repr::Buf { data, pos } => {
                let n = dst.len().min(data.len() - *pos);
                dst[..n].copy_from_slice(&data[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            },
            Repr::File { file, len, pos } => {
                let want = (dst.len() as u64).min(*len - *pos) as usize;
                if want == 0 {
                    return Ok(0);
                }
                let f = file.as_file_mut();
                f.seek(SeekFrom::Start(*pos))?;
                let n = f.read(&mut dst[..want])?;
                *pos += n as u64;
                Ok(n)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_write_then_drain() {
        let mut pdu = Pdu::new();
        pdu.write_all(b"hello ").unwrap();
        pdu.write_all(b"world").unwrap();
        assert_eq!(pdu.len(), 11);
        assert!(!pdu.is_spilled());

        let mut out = Vec::new();
        pdu.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
        assert!(pdu.is_empty());
    }

    #[test]
    fn spill_preserves_bytes_and_appends() {
        let mut pdu = Pdu::from_bytes(vec![0x41u8; 100]);
        pdu.spill_into(NamedTempFile::new().unwrap()).unwrap();
        assert!(pdu.is_spilled());
        assert_eq!(pdu.len(), 100);

        pdu.write_all(&[0x42u8; 50]).unwrap();
        assert_eq!(pdu.len(), 150);

        let mut out = Vec::new();
        pdu.read_to_end(&mut out).unwrap();
        assert_eq!(&out[..100], &[0x41u8; 100][..]);
        assert_eq!(&out[100..], &[0x42u8; 50][..]);
    }

    #[test]
    fn spill_happens_at_most_once() {
        let mut pdu = Pdu::new();
        pdu.spill_into(NamedTempFile::new().unwrap()).unwrap();
        let err = pdu.spill_into(NamedTempFile::new().unwrap()).unwrap_err();
        assert!(matches!(err, PduError::AlreadySpilled));
    }

    #[test]
    fn exactly_one_representation() {
        // The enum makes dual representation unconstructible; this pins the
        // observable half of the invariant across the promotion boundary.
        let mut pdu = Pdu::from_bytes(b"abc".to_vec());
        assert!(!pdu.is_spilled());
        pdu.spill_into(NamedTempFile::new().unwrap()).unwrap();
        assert!(pdu.is_spilled());
    }

    #[test]
    fn temp_file_unlinked_on_drop() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();

        let mut pdu = Pdu::from_bytes(b"spill me".to_vec());
        pdu.spill_into(file).unwrap();
        assert!(path.exists());

        drop(pdu);
        assert!(!path.exists());
    }

    #[test]
    fn rewind_restores_head() {
        let mut pdu = Pdu::from_bytes(b"abcdef".to_vec());
        let mut first = [0u8; 3];
        pdu.read_exact(&mut first).unwrap();
        assert_eq!(pdu.len(), 3);

        pdu.rewind();
        assert_eq!(pdu.len(), 6);
        let mut all = Vec::new();
        pdu.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"abcdef");
    }
}
