//! Random test sources and the concatenations they should produce
use crate::Result;
use color_eyre::eyre::{ensure, eyre};
use rand::prelude::*;
use sha2::Digest;

/// The size of one test source, before any data is generated for it
#[derive(Clone, Debug)]
pub struct TestSource {
    pub name: String,
    pub size: usize,
}

impl TestSource {
    /// Make a new test source spec with the size specified as a string so we can use
    /// human-friendly units like "10 KB" or "2 MiB"
    pub fn new(name: impl Into<String>, size: impl AsRef<str>) -> Self {
        let size = byte_unit::Byte::from_str(size).unwrap();

        Self {
            name: name.into(),
            size: size.get_bytes() as usize,
        }
    }
}

/// A [`TestSource`] with its random contents
#[derive(Clone, Debug)]
pub struct TestSourceWithData {
    pub name: String,
    pub data: Vec<u8>,
    pub hash: [u8; 32],
}

/// Generate random data for each source, preserving their order
pub fn make_test_data(sources: impl IntoIterator<Item = TestSource>) -> Vec<TestSourceWithData> {
    let mut rand = rand::thread_rng();

    sources
        .into_iter()
        .map(|source| {
            let mut data = vec![0u8; source.size];
            rand.fill(&mut data[..]);

            TestSourceWithData {
                name: source.name,
                hash: sha256(&data),
                data,
            }
        })
        .collect()
}

/// Shorthand for [`make_test_data`] when the names don't matter.  Sources are named `source-N`.
pub fn make_sized_test_data<'a>(
    sizes: impl IntoIterator<Item = &'a str>,
) -> Vec<TestSourceWithData> {
    make_test_data(
        sizes
            .into_iter()
            .enumerate()
            .map(|(index, size)| TestSource::new(format!("source-{index}"), size)),
    )
}

/// The result of concatenating all of `sources` in order
pub fn expected_concatenation(sources: &[TestSourceWithData]) -> Vec<u8> {
    sources
        .iter()
        .flat_map(|source| source.data.iter().copied())
        .collect()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

/// Check that `actual` is exactly the concatenation of `sources`.
///
/// On a mismatch the error names the first source whose bytes are wrong, which says a lot more
/// than two unequal multi-megabyte buffers would.
pub fn validate_concatenation(actual: &[u8], sources: &[TestSourceWithData]) -> Result<()> {
    let expected_len: usize = sources.iter().map(|source| source.data.len()).sum();
    ensure!(
        actual.len() == expected_len,
        "Concatenation is {} bytes but the sources total {} bytes",
        actual.len(),
        expected_len
    );

    let mut offset = 0;
    for source in sources {
        let range = offset..offset + source.data.len();
        let chunk = actual
            .get(range.clone())
            .ok_or_else(|| eyre!("BUG: range {range:?} is out of bounds"))?;

        ensure!(
            sha256(chunk) == source.hash,
            "Source '{}' at bytes {:?} of the concatenation doesn't match",
            source.name,
            range
        );

        offset = range.end;
    }

    Ok(())
}
