use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use bio::io::fasta::Reader as FastaReader;
use bio::io::fastq::Reader as FastqReader;
use log::debug;

use crate::errs::{MsError, MsResult};

/// One input sequence, bases pre-translated to 2-bit codes
/// (A=0, C=1, G=2, T=3; N and anything else collapses to 0).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SeqRecord {
    pub id: String,
    pub seq: Vec<u8>,
}

impl SeqRecord {
    pub fn from_text(id: &str, text: &[u8]) -> Self {
        Self { id: id.to_owned(), seq: encode_bases(text) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

#[inline]
pub fn encode_base(b: u8) -> u8 {
    match b {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        _ => 0,
    }
}

pub fn encode_bases(text: &[u8]) -> Vec<u8> {
    text.iter().map(|b| encode_base(*b)).collect()
}

/// FASTA/FASTQ adaptor fulfilling the "records with id, length, 2-bit
/// bases" contract. The format is picked from the file extension.
pub enum SequenceFileReader {
    Fasta(bio::io::fasta::Records<BufReader<File>>),
    Fastq(bio::io::fastq::Records<BufReader<File>>),
}

impl SequenceFileReader {
    pub fn open(path: &Path) -> MsResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "fa" | "fasta" | "fna" => {
                debug!("reading {} as FASTA", path.display());
                let reader = FastaReader::new(File::open(path)?);
                Ok(Self::Fasta(reader.records()))
            }
            "fq" | "fastq" => {
                debug!("reading {} as FASTQ", path.display());
                let reader = FastqReader::new(File::open(path)?);
                Ok(Self::Fastq(reader.records()))
            }
            _ => Err(MsError::UnknownSequenceFormat(path.to_path_buf())),
        }
    }
}

fn invalid_record<E: std::fmt::Display>(e: E) -> MsError {
    MsError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        e.to_string(),
    ))
}

impl Iterator for SequenceFileReader {
    type Item = MsResult<SeqRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Fasta(records) => records.next().map(|r| {
                r.map(|rec| SeqRecord::from_text(rec.id(), rec.seq()))
                    .map_err(invalid_record)
            }),
            Self::Fastq(records) => records.next().map(|r| {
                r.map(|rec| SeqRecord::from_text(rec.id(), rec.seq()))
                    .map_err(invalid_record)
            }),
        }
    }
}

#[cfg(test)]
mod sequence_tests {
    use std::io::Write;

    use similar_asserts::assert_eq;

    use super::{encode_bases, SeqRecord, SequenceFileReader};

    #[test]
    fn test_encode_bases() {
        assert_eq!(encode_bases(b"ACGT"), vec![0, 1, 2, 3]);
        assert_eq!(encode_bases(b"acgt"), vec![0, 1, 2, 3]);
        // N and junk collapse to A
        assert_eq!(encode_bases(b"NnX-"), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_fasta_reader() {
        let dir = tempfile::tempdir().unwrap();
        let fp = dir.path().join("reads.fa");
        {
            let mut fh = std::fs::File::create(&fp).unwrap();
            writeln!(fh, ">read1").unwrap();
            writeln!(fh, "ACGTACGT").unwrap();
            writeln!(fh, ">read2 a description").unwrap();
            writeln!(fh, "GGGTTT").unwrap();
        }
        let records = SequenceFileReader::open(&fp)
            .unwrap()
            .collect::<Result<Vec<SeqRecord>, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "read1".to_string());
        assert_eq!(records[0].seq, encode_bases(b"ACGTACGT"));
        assert_eq!(records[1].id, "read2".to_string());
        assert_eq!(records[1].len(), 6);
    }

    #[test]
    fn test_fastq_reader() {
        let dir = tempfile::tempdir().unwrap();
        let fp = dir.path().join("reads.fastq");
        {
            let mut fh = std::fs::File::create(&fp).unwrap();
            writeln!(fh, "@read1").unwrap();
            writeln!(fh, "ACGTAACC").unwrap();
            writeln!(fh, "+").unwrap();
            writeln!(fh, "IIIIIIII").unwrap();
        }
        let records = SequenceFileReader::open(&fp)
            .unwrap()
            .collect::<Result<Vec<SeqRecord>, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].seq, encode_bases(b"ACGTAACC"));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let r = SequenceFileReader::open(std::path::Path::new("reads.bam"));
        assert!(r.is_err());
    }
}
