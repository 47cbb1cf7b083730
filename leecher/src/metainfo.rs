use std::collections::HashMap;
use serde_bencode::value::Value;
use url::Url;
use crate::ID;

#[derive(Debug, thiserror::Error)]
pub enum MetaInfoError {

    #[error("bencode error whilst decoding metainfo: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error("invalid file extension, expected .torrent")]
    InvalidExtension,

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("field has wrong type or value: {0}")]
    InvalidField(&'static str),

    #[error("invalid pieces length, must be divisible by 20")]
    InvalidPiecesLength,

    #[error("torrent has no content")]
    FileNoSize,

    #[error("expected {expected} piece hashes, found {found}")]
    PieceCountMismatch {
        expected: u64,
        found: usize,
    },

    #[error("no announce urls")]
    NoTrackers,
}

type Result<T> = std::result::Result<T, MetaInfoError>;
type Dict = HashMap<Vec<u8>, Value>;

// Read-only view over a decoded torrent.
#[derive(Clone)]
pub struct MetaInfo {

    // Suggested name of the file or directory.
    name: String,

    // sha1 hash of the bencoded info dict.
    info_hash: ID,

    // Number of bytes in each piece.
    piece_len: usize,

    // Sum of all file lengths.
    total_len: u64,

    // One 20-byte SHA1 hash per piece.
    piece_hashes: Vec<ID>,

    // Announce urls in the order they should be tried.
    trackers: Vec<Url>,

    multi_file: bool,

}

impl MetaInfo {

    pub fn new<P: AsRef<std::path::Path>>(path: P) -> Result<MetaInfo> {

        if path.as_ref().extension().unwrap_or_default() != "torrent" {
            return Err(MetaInfoError::InvalidExtension);
        }

        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<MetaInfo> {
        let value: Value = serde_bencode::from_bytes(bytes)?;
        Self::from_value(&value)
    }

    // Builds the metainfo from an already decoded bencode value.
    pub fn from_value(value: &Value) -> Result<MetaInfo> {

        let root = as_dict(value, "root")?;
        let info_value = get(root, "info")?;
        let info = as_dict(info_value, "info")?;

        let name = String::from_utf8_lossy(as_bytes(get(info, "name")?, "name")?).into_owned();

        let piece_len = as_int(get(info, "piece length")?, "piece length")?;
        if piece_len <= 0 {
            return Err(MetaInfoError::InvalidField("piece length"));
        }
        let piece_len = piece_len as usize;

        let (total_len, multi_file) = match info.get(b"files".as_slice()) {
            Some(files) => {
                let mut total = 0u64;
                for file in as_list(files, "files")? {
                    let file = as_dict(file, "files")?;
                    let len = as_int(get(file, "length")?, "length")?;
                    if len < 0 {
                        return Err(MetaInfoError::InvalidField("length"));
                    }
                    total += len as u64;
                }
                (total, true)
            },
            None => {
                let len = as_int(get(info, "length")?, "length")?;
                if len < 0 {
                    return Err(MetaInfoError::InvalidField("length"));
                }
                (len as u64, false)
            },
        };
        if total_len == 0 {
            return Err(MetaInfoError::FileNoSize);
        }

        let pieces = as_bytes(get(info, "pieces")?, "pieces")?;
        if pieces.len() % 20 != 0 || pieces.is_empty() {
            return Err(MetaInfoError::InvalidPiecesLength);
        }
        let piece_hashes: Vec<ID> = pieces
            .chunks_exact(20)
            .map(|c| {
                let mut hash = [0; 20];
                hash.copy_from_slice(c);
                hash
            })
            .collect();
        let expected = (total_len + piece_len as u64 - 1) / piece_len as u64;
        if piece_hashes.len() as u64 != expected {
            return Err(MetaInfoError::PieceCountMismatch { expected, found: piece_hashes.len() });
        }

        let trackers = trackers(root)?;
        if trackers.is_empty() {
            return Err(MetaInfoError::NoTrackers);
        }

        let metainfo = MetaInfo {
            name,
            info_hash: info_hash(info_value)?,
            piece_len,
            total_len,
            piece_hashes,
            trackers,
            multi_file,
        };
        tracing::debug!("metainfo created: {:#?}", metainfo);
        Ok(metainfo)
    }

    pub fn piece_hashes(&self) -> &[ID] { &self.piece_hashes }

    pub fn piece_len(&self) -> usize { self.piece_len }

    pub fn num_pieces(&self) -> u32 { self.piece_hashes.len() as u32 }

    pub fn is_multi_file(&self) -> bool { self.multi_file }

    pub fn total_len(&self) -> u64 { self.total_len }

    pub fn info_hash(&self) -> ID { self.info_hash }

    pub fn name(&self) -> &str { &self.name }

    pub fn trackers(&self) -> &[Url] { &self.trackers }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    pub fn size_fmt(&self) -> String {
        format_size(self.total_len)
    }
}

// Calculates the sha1 hash of info dict to verify torrent integrity.
// Dictionary keys are re-encoded in sorted order, as bencode requires.
fn info_hash(info: &Value) -> Result<ID> {
    use sha1::Digest;
    let mut hasher = sha1::Sha1::new();
    hasher.update(serde_bencode::to_bytes(info)?);
    Ok(hasher.finalize().into())
}

// announce-list tiers flattened in order, then the announce key.
fn trackers(root: &Dict) -> Result<Vec<Url>> {
    let mut raw = Vec::new();

    if let Some(list) = root.get(b"announce-list".as_slice()) {
        for tier in as_list(list, "announce-list")? {
            for url in as_list(tier, "announce-list")? {
                raw.push(as_bytes(url, "announce-list")?);
            }
        }
    }
    if let Some(announce) = root.get(b"announce".as_slice()) {
        raw.push(as_bytes(announce, "announce")?);
    }

    let mut urls = Vec::with_capacity(raw.len());
    for bytes in raw {
        let s = String::from_utf8_lossy(bytes);
        match Url::parse(&s) {
            Ok(url) => urls.push(url),
            Err(e) => tracing::warn!("skipping invalid announce url {}: {}", s, e),
        }
    }
    Ok(urls)
}

fn get<'a>(dict: &'a Dict, key: &'static str) -> Result<&'a Value> {
    dict.get(key.as_bytes()).ok_or(MetaInfoError::MissingField(key))
}

fn as_dict<'a>(value: &'a Value, field: &'static str) -> Result<&'a Dict> {
    match value {
        Value::Dict(d) => Ok(d),
        _ => Err(MetaInfoError::InvalidField(field)),
    }
}

fn as_list<'a>(value: &'a Value, field: &'static str) -> Result<&'a [Value]> {
    match value {
        Value::List(l) => Ok(l),
        _ => Err(MetaInfoError::InvalidField(field)),
    }
}

fn as_bytes<'a>(value: &'a Value, field: &'static str) -> Result<&'a [u8]> {
    match value {
        Value::Bytes(b) => Ok(b),
        _ => Err(MetaInfoError::InvalidField(field)),
    }
}

fn as_int(value: &Value, field: &'static str) -> Result<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        _ => Err(MetaInfoError::InvalidField(field)),
    }
}

fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = "B";
    for next in ["KiB", "MiB", "GiB", "TiB"] {
        if size <= 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = next;
    }
    format!("{:.2} {}", size, unit)
}

// Dont want to print out the piece hashes, so we implement Debug manually.
impl std::fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaInfo")
            .field("name", &self.name)
            .field("info_hash", &self.info_hash_hex())
            .field("piece_len", &self.piece_len)
            .field("total_len", &self.total_len)
            .field("num_pieces", &self.piece_hashes.len())
            .field("multi_file", &self.multi_file)
            .field("trackers", &self.trackers.iter().map(|u| u.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::Digest;

    // Bencoded byte string.
    fn bstr(s: &[u8]) -> Vec<u8> {
        let mut out = format!("{}:", s.len()).into_bytes();
        out.extend_from_slice(s);
        out
    }

    // Single file info dict, keys already in sorted order.
    fn info_bytes(length: u64, piece_len: u64, num_hashes: usize) -> Vec<u8> {
        let mut out = b"d".to_vec();
        out.extend(bstr(b"length"));
        out.extend(format!("i{}e", length).into_bytes());
        out.extend(bstr(b"name"));
        out.extend(bstr(b"test.bin"));
        out.extend(bstr(b"piece length"));
        out.extend(format!("i{}e", piece_len).into_bytes());
        out.extend(bstr(b"pieces"));
        out.extend(bstr(&vec![0xab; 20 * num_hashes]));
        out.push(b'e');
        out
    }

    fn torrent_bytes(info: &[u8]) -> Vec<u8> {
        let mut out = b"d".to_vec();
        out.extend(bstr(b"announce"));
        out.extend(bstr(b"udp://tracker.example.org:6969/announce"));
        out.extend(bstr(b"announce-list"));
        out.push(b'l');
        out.push(b'l');
        out.extend(bstr(b"udp://a.example.org:1337"));
        out.extend(bstr(b"http://b.example.org/announce"));
        out.push(b'e');
        out.push(b'e');
        out.extend(bstr(b"info"));
        out.extend_from_slice(info);
        out.push(b'e');
        out
    }

    #[test]
    fn test_metainfo() {
        let info = info_bytes(197_608, 65_536, 4);
        let metainfo = MetaInfo::from_bytes(&torrent_bytes(&info)).unwrap();

        assert_eq!(metainfo.name(), "test.bin");
        assert_eq!(metainfo.num_pieces(), 4);
        assert_eq!(metainfo.piece_len(), 65_536);
        assert_eq!(metainfo.total_len(), 197_608);
        assert!(!metainfo.is_multi_file());
        assert_eq!(metainfo.piece_hashes()[3], [0xab; 20]);

        let expected: [u8; 20] = sha1::Sha1::digest(&info).into();
        assert_eq!(metainfo.info_hash(), expected);

        let trackers: Vec<&str> = metainfo.trackers().iter().map(|u| u.as_str()).collect();
        assert_eq!(trackers, vec![
            "udp://a.example.org:1337",
            "http://b.example.org/announce",
            "udp://tracker.example.org:6969/announce",
        ]);
    }

    #[test]
    fn test_info_hash() {
        let metainfo = MetaInfo::from_bytes(&torrent_bytes(&info_bytes(10, 16_384, 1))).unwrap();
        assert_eq!(metainfo.info_hash(), hex_literal::hex!("983c729891c09a439b63f5bedfa5424536037353"));
        assert_eq!(metainfo.info_hash_hex(), "983c729891c09a439b63f5bedfa5424536037353");
    }

    #[test]
    fn test_multi_file_length() {
        let mut files = Dict::new();
        files.insert(b"length".to_vec(), Value::Int(30_000));
        files.insert(b"path".to_vec(), Value::List(vec![Value::Bytes(b"a".to_vec())]));
        let mut second = files.clone();
        second.insert(b"length".to_vec(), Value::Int(10_000));

        let mut info = Dict::new();
        info.insert(b"name".to_vec(), Value::Bytes(b"dir".to_vec()));
        info.insert(b"piece length".to_vec(), Value::Int(32_768));
        info.insert(b"pieces".to_vec(), Value::Bytes(vec![0; 40]));
        info.insert(b"files".to_vec(), Value::List(vec![Value::Dict(files), Value::Dict(second)]));

        let mut root = Dict::new();
        root.insert(b"announce".to_vec(), Value::Bytes(b"udp://t.example.org:80".to_vec()));
        root.insert(b"info".to_vec(), Value::Dict(info));

        let metainfo = MetaInfo::from_value(&Value::Dict(root)).unwrap();
        assert!(metainfo.is_multi_file());
        assert_eq!(metainfo.total_len(), 40_000);
        assert_eq!(metainfo.num_pieces(), 2);
    }

    #[test]
    fn test_piece_count_mismatch() {
        let info = info_bytes(197_608, 65_536, 3);
        match MetaInfo::from_bytes(&torrent_bytes(&info)) {
            Err(MetaInfoError::PieceCountMismatch { expected: 4, found: 3 }) => {},
            other => panic!("expected piece count mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_info() {
        let mut root = Dict::new();
        root.insert(b"announce".to_vec(), Value::Bytes(b"udp://t.example.org:80".to_vec()));
        match MetaInfo::from_value(&Value::Dict(root)) {
            Err(MetaInfoError::MissingField("info")) => {},
            other => panic!("expected missing info, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_pieces_length() {
        let mut out = b"d".to_vec();
        out.extend(bstr(b"length"));
        out.extend(b"i10e");
        out.extend(bstr(b"name"));
        out.extend(bstr(b"x"));
        out.extend(bstr(b"piece length"));
        out.extend(b"i16384e");
        out.extend(bstr(b"pieces"));
        out.extend(bstr(&[0; 19]));
        out.push(b'e');
        assert!(matches!(
            MetaInfo::from_bytes(&torrent_bytes(&out)),
            Err(MetaInfoError::InvalidPiecesLength)
        ));
    }

    #[test]
    fn test_invalid_extension() {
        assert!(matches!(MetaInfo::new("file.txt"), Err(MetaInfoError::InvalidExtension)));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512.00 B");
        assert_eq!(format_size(197_608), "192.98 KiB");
    }
}
