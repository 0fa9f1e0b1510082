//! Policy artifact I/O.
//!
//! Three on-disk forms are accepted by [`load_policy`], chosen by extension:
//!
//! | Extension | Format |
//! |-----------|--------|
//! | `.npy` | NumPy array file, 2-D integer dtype, C or Fortran order |
//! | `.json` | Nested array of integers, `rows[mask][item_type]` |
//! | other | Native format: 16-byte header + `u8[rows * cols]` row-major |
//!
//! The native format is loaded via zero-copy memory mapping (`memmap2`), so a
//! 20-slot table is available without reading it into memory first.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use memmap2::Mmap;
use tracing::info;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::types::{slot_count_for_shape, PolicyTable};

/// Native policy file header: magic + version + row count + column count.
///
/// All fields little-endian. Magic bytes "SPOL" identify the file format.
#[repr(C)]
struct PolicyFileHeader {
    magic: u32,
    version: u32,
    rows: u32,
    cols: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<PolicyFileHeader>();

impl PolicyFileHeader {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.rows.to_le_bytes());
        out[12..16].copy_from_slice(&self.cols.to_le_bytes());
        out
    }

    fn parse(bytes: &[u8]) -> Option<Self> {
        let word = |i: usize| -> Option<u32> {
            Some(u32::from_le_bytes(bytes.get(i..i + 4)?.try_into().ok()?))
        };
        Some(Self {
            magic: word(0)?,
            version: word(4)?,
            rows: word(8)?,
            cols: word(12)?,
        })
    }
}

/// Load a policy artifact, picking the decoder from the file extension.
pub fn load_policy(path: impl AsRef<Path>) -> Result<PolicyTable> {
    let path = path.as_ref();
    let start_time = Instant::now();
    info!(path = %path.display(), "loading policy");

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let policy = match ext.as_deref() {
        Some("npy") => load_policy_npy(path)?,
        Some("json") => load_policy_json(path)?,
        _ => load_policy_bin(path)?,
    };

    let elapsed = start_time.elapsed().as_secs_f64() * 1000.0;
    info!(
        slots = policy.slot_count(),
        types = policy.type_count(),
        mapped = policy.is_mapped(),
        "loaded policy in {:.2} ms",
        elapsed
    );
    Ok(policy)
}

/// Load a native policy file via zero-copy mmap.
pub fn load_policy_bin(path: impl AsRef<Path>) -> Result<PolicyTable> {
    let file = File::open(path.as_ref())?;
    let mmap = unsafe { Mmap::map(&file) }?;

    let header = PolicyFileHeader::parse(&mmap)
        .ok_or_else(|| Error::format(format!("policy file too small ({} bytes)", mmap.len())))?;
    if header.magic != POLICY_FILE_MAGIC || header.version != POLICY_FILE_VERSION {
        return Err(Error::format(format!(
            "invalid policy file format (magic=0x{:08x} version={})",
            header.magic, header.version
        )));
    }

    PolicyTable::from_mmap(mmap, HEADER_SIZE, header.rows as usize, header.cols as usize)
}

/// Save a policy in the native format. Creates parent directories.
pub fn save_policy(policy: &PolicyTable, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let start_time = Instant::now();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = File::create(path)?;

    let header = PolicyFileHeader {
        magic: POLICY_FILE_MAGIC,
        version: POLICY_FILE_VERSION,
        rows: policy.row_count() as u32,
        cols: policy.type_count() as u32,
    };
    f.write_all(&header.to_bytes())?;
    f.write_all(policy.entries())?;

    let elapsed = start_time.elapsed().as_secs_f64() * 1000.0;
    info!(
        path = %path.display(),
        bytes = HEADER_SIZE + policy.entries().len(),
        "saved policy in {:.2} ms",
        elapsed
    );
    Ok(())
}

/// Load a policy from a JSON nested integer array.
pub fn load_policy_json(path: impl AsRef<Path>) -> Result<PolicyTable> {
    let data = fs::read(path.as_ref())?;
    let rows: Vec<Vec<i64>> = serde_json::from_slice(&data)
        .map_err(|e| Error::format(format!("policy JSON is not a 2-D integer array: {}", e)))?;
    PolicyTable::from_rows(&rows)
}

// ── NumPy .npy ──────────────────────────────────────────────────────

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Integer element types accepted in `.npy` policies.
#[derive(Clone, Copy, Debug, PartialEq)]
enum NpyDtype {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl NpyDtype {
    fn parse(descr: &str) -> Result<Self> {
        let dtype = match descr {
            "|i1" | "<i1" | "i1" => NpyDtype::I8,
            "|u1" | "<u1" | "u1" => NpyDtype::U8,
            "<i2" => NpyDtype::I16,
            "<u2" => NpyDtype::U16,
            "<i4" => NpyDtype::I32,
            "<u4" => NpyDtype::U32,
            "<i8" => NpyDtype::I64,
            "<u8" => NpyDtype::U64,
            other => {
                return Err(Error::format(format!(
                    "unsupported .npy dtype '{}' (expected little-endian integers)",
                    other
                )))
            }
        };
        Ok(dtype)
    }

    fn size(self) -> usize {
        match self {
            NpyDtype::I8 | NpyDtype::U8 => 1,
            NpyDtype::I16 | NpyDtype::U16 => 2,
            NpyDtype::I32 | NpyDtype::U32 => 4,
            NpyDtype::I64 | NpyDtype::U64 => 8,
        }
    }

    /// Decode one element. `u64` values above `i64::MAX` saturate, which the
    /// slot range check rejects anyway.
    fn read(self, b: &[u8]) -> i64 {
        match self {
            NpyDtype::I8 => b[0] as i8 as i64,
            NpyDtype::U8 => b[0] as i64,
            NpyDtype::I16 => i16::from_le_bytes([b[0], b[1]]) as i64,
            NpyDtype::U16 => u16::from_le_bytes([b[0], b[1]]) as i64,
            NpyDtype::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64,
            NpyDtype::U32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64,
            NpyDtype::I64 => i64::from_le_bytes(b[..8].try_into().unwrap_or([0; 8])),
            NpyDtype::U64 => {
                let v = u64::from_le_bytes(b[..8].try_into().unwrap_or([0; 8]));
                i64::try_from(v).unwrap_or(i64::MAX)
            }
        }
    }
}

/// Parsed `.npy` header dictionary.
#[derive(Debug, PartialEq)]
struct NpyHeader {
    dtype: NpyDtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Value of `key` in the header dict, starting right after the colon.
fn npy_field<'a>(dict: &'a str, key: &str) -> Result<&'a str> {
    let needle = format!("'{}'", key);
    let at = dict
        .find(&needle)
        .ok_or_else(|| Error::format(format!(".npy header has no '{}' field", key)))?;
    let rest = &dict[at + needle.len()..];
    let colon = rest
        .find(':')
        .ok_or_else(|| Error::format(format!(".npy header field '{}' has no value", key)))?;
    Ok(rest[colon + 1..].trim_start())
}

fn parse_npy_header(dict: &str) -> Result<NpyHeader> {
    let descr = npy_field(dict, "descr")?;
    let quote = descr
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| Error::format(".npy 'descr' is not a string"))?;
    let end = descr[1..]
        .find(quote)
        .ok_or_else(|| Error::format(".npy 'descr' is unterminated"))?;
    let dtype = NpyDtype::parse(&descr[1..1 + end])?;

    let fortran = npy_field(dict, "fortran_order")?;
    let fortran_order = if fortran.starts_with("True") {
        true
    } else if fortran.starts_with("False") {
        false
    } else {
        return Err(Error::format(".npy 'fortran_order' is not a boolean"));
    };

    let shape_str = npy_field(dict, "shape")?;
    let close = shape_str
        .find(')')
        .filter(|_| shape_str.starts_with('('))
        .ok_or_else(|| Error::format(".npy 'shape' is not a tuple"))?;
    let shape = shape_str[1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| Error::format(format!(".npy shape entry '{}' is not a size", s)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(NpyHeader {
        dtype,
        fortran_order,
        shape,
    })
}

/// Decode an in-memory `.npy` file into a policy table.
pub fn policy_from_npy_bytes(data: &[u8]) -> Result<PolicyTable> {
    if data.len() < 10 || &data[..6] != NPY_MAGIC {
        return Err(Error::format("not a .npy file (bad magic)"));
    }
    let major = data[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([data[8], data[9]]) as usize, 10),
        2 | 3 => {
            if data.len() < 12 {
                return Err(Error::format(".npy header truncated"));
            }
            (
                u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize,
                12,
            )
        }
        v => return Err(Error::format(format!("unsupported .npy version {}", v))),
    };
    let data_start = header_start + header_len;
    if data.len() < data_start {
        return Err(Error::format(".npy header truncated"));
    }
    let dict = std::str::from_utf8(&data[header_start..data_start])
        .map_err(|_| Error::format(".npy header is not text"))?;
    let header = parse_npy_header(dict)?;

    if header.shape.len() != 2 {
        return Err(Error::format(format!(
            "policy must be two-dimensional (2^slots, types), got {} dimensions",
            header.shape.len()
        )));
    }
    let (rows, cols) = (header.shape[0], header.shape[1]);
    slot_count_for_shape(rows)?;
    let size = header.dtype.size();
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(size))
        .ok_or_else(|| Error::format(format!(".npy shape ({}, {}) is too large", rows, cols)))?;
    let body = &data[data_start..];
    if body.len() != expected {
        return Err(Error::format(format!(
            ".npy data size mismatch: expected {}, got {}",
            expected,
            body.len()
        )));
    }

    let dtype = header.dtype;
    let at = |flat: usize| dtype.read(&body[flat * size..(flat + 1) * size]);
    if header.fortran_order {
        PolicyTable::from_flat(
            rows,
            cols,
            (0..rows * cols).map(|i| at((i % cols) * rows + i / cols)),
        )
    } else {
        PolicyTable::from_flat(rows, cols, (0..rows * cols).map(at))
    }
}

/// Load a policy from a NumPy `.npy` file.
pub fn load_policy_npy(path: impl AsRef<Path>) -> Result<PolicyTable> {
    let data = fs::read(path.as_ref())?;
    policy_from_npy_bytes(&data)
}

/// Encode a policy as a version 1 `.npy` file with `<i8` elements.
pub fn policy_to_npy_bytes(policy: &PolicyTable) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '<i8', 'fortran_order': False, 'shape': ({}, {}), }}",
        policy.row_count(),
        policy.type_count()
    );
    // Magic + version + length field + dict + newline, padded to 64 bytes.
    let unpadded = NPY_MAGIC.len() + 2 + 2 + dict.len() + 1;
    let pad = (64 - unpadded % 64) % 64;
    let header_len = dict.len() + pad + 1;

    let mut out = Vec::with_capacity(unpadded + pad + policy.entries().len() * 8);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(pad));
    out.push(b'\n');
    for &slot in policy.entries() {
        let v = if slot == NO_SLOT { -1 } else { slot as i64 };
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Save a policy as a NumPy `.npy` file.
pub fn save_policy_npy(policy: &PolicyTable, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, policy_to_npy_bytes(policy))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("seqassign_test_{}_{}", std::process::id(), name))
    }

    fn sample_policy() -> PolicyTable {
        // 3 slots, 2 types; always recommend the highest free slot.
        let rows: Vec<Vec<i64>> = (0..8u32)
            .map(|mask| {
                let best = (0..3).rev().find(|&b| is_slot_free(mask, b)).unwrap_or(0);
                vec![best as i64; 2]
            })
            .collect();
        PolicyTable::from_rows(&rows).unwrap()
    }

    /// Hand-built `.npy` with an arbitrary dict and raw body.
    fn npy_bytes(dict: &str, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(NPY_MAGIC);
        out.extend_from_slice(&[1, 0]);
        let header = format!("{}\n", dict);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_native_round_trip() {
        let path = tmp("native.bin");
        let p1 = sample_policy();
        save_policy(&p1, &path).unwrap();

        let p2 = load_policy(&path).unwrap();
        assert!(p2.is_mapped());
        assert_eq!(p2.slot_count(), 3);
        assert_eq!(p2.type_count(), 2);
        assert_eq!(p1.entries(), p2.entries());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_native_bad_magic() {
        let path = tmp("badmagic.bin");
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[..4].copy_from_slice(b"NOPE");
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(load_policy(&path), Err(Error::Format(_))));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_native_truncated_body() {
        let path = tmp("truncated.bin");
        let p = sample_policy();
        save_policy(&p, &path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
        assert!(matches!(load_policy(&path), Err(Error::Format(_))));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_nonexistent() {
        let err = load_policy("/tmp/nonexistent_seqassign_policy.npy").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_npy_round_trip() {
        let path = tmp("policy.npy");
        let p1 = sample_policy();
        save_policy_npy(&p1, &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        // Header is padded so the data starts on a 64-byte boundary.
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);

        let p2 = load_policy(&path).unwrap();
        assert_eq!(p2.slot_count(), 3);
        assert_eq!(p1.entries(), p2.entries());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_npy_rejects_three_dimensions() {
        let bytes = npy_bytes(
            "{'descr': '|u1', 'fortran_order': False, 'shape': (2, 1, 1), }",
            &[0, 0],
        );
        let err = policy_from_npy_bytes(&bytes).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_npy_rejects_one_dimension() {
        let bytes = npy_bytes(
            "{'descr': '|u1', 'fortran_order': False, 'shape': (4,), }",
            &[0, 0, 0, 0],
        );
        assert!(matches!(
            policy_from_npy_bytes(&bytes),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_npy_rejects_non_power_of_two_rows() {
        let bytes = npy_bytes(
            "{'descr': '|u1', 'fortran_order': False, 'shape': (3, 1), }",
            &[0, 0, 0],
        );
        assert!(matches!(
            policy_from_npy_bytes(&bytes),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_npy_rejects_huge_shape() {
        let bytes = npy_bytes(
            "{'descr': '<i8', 'fortran_order': False, 'shape': (4611686018427387904, 8), }",
            &[0; 64],
        );
        assert!(matches!(
            policy_from_npy_bytes(&bytes),
            Err(Error::Format(_))
        ));

        // Valid row count, column count large enough to overflow the byte size.
        let bytes = npy_bytes(
            "{'descr': '<i8', 'fortran_order': False, 'shape': (4, 4611686018427387904), }",
            &[0; 64],
        );
        assert!(matches!(
            policy_from_npy_bytes(&bytes),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_npy_sentinel_round_trip() {
        let p1 = PolicyTable::from_rows(&[vec![-1, -1], vec![0, 0], vec![1, 1], vec![1, 0]]).unwrap();
        let bytes = policy_to_npy_bytes(&p1);
        let data_start = bytes.len() - 8 * 8;
        assert_eq!(i64::from_le_bytes(bytes[data_start..data_start + 8].try_into().unwrap()), -1);
        let p2 = policy_from_npy_bytes(&bytes).unwrap();
        assert_eq!(p1.entries(), p2.entries());
    }

    #[test]
    fn test_npy_int32_and_fortran_order() {
        // Logical table (4 masks x 2 types): [[0,0],[0,0],[1,1],[1,0]],
        // stored column-major as int32.
        let col_major: [i32; 8] = [0, 0, 1, 1, 0, 0, 1, 0];
        let body: Vec<u8> = col_major.iter().flat_map(|v| v.to_le_bytes()).collect();
        let bytes = npy_bytes(
            "{'descr': '<i4', 'fortran_order': True, 'shape': (4, 2), }",
            &body,
        );
        let p = policy_from_npy_bytes(&bytes).unwrap();
        assert_eq!(p.entries(), &[0, 0, 0, 0, 1, 1, 1, 0]);
    }

    #[test]
    fn test_npy_rejects_float_dtype() {
        let bytes = npy_bytes(
            "{'descr': '<f8', 'fortran_order': False, 'shape': (1, 0), }",
            &[],
        );
        assert!(matches!(
            policy_from_npy_bytes(&bytes),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_npy_bad_magic() {
        assert!(matches!(
            policy_from_npy_bytes(b"not numpy at all"),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_json_policy() {
        let path = tmp("policy.json");
        fs::write(&path, "[[0,0],[0,0],[1,1],[1,0]]").unwrap();
        let p = load_policy(&path).unwrap();
        assert_eq!(p.slot_count(), 2);
        assert_eq!(p.get(3, 0), 1);

        fs::write(&path, "[[[0]],[[0]]]").unwrap();
        assert!(matches!(load_policy(&path), Err(Error::Format(_))));
        let _ = fs::remove_file(&path);
    }
}
