//! The collective communication abstraction.
//!
//! Every operation on [`Communicator`] is collective: all ranks of the
//! communicator must make the same call, with the same root, in the same
//! order. A rank that skips a call desynchronizes the whole job, which is
//! why errors from this layer are never recovered locally.

use crate::error::CommError;

/// Element-wise reduction applied by [`Communicator::all_reduce_f64`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    /// Minimum over ranks.
    Min,
    /// Maximum over ranks.
    Max,
    /// Sum over ranks.
    Sum,
}

impl ReduceOp {
    /// Fold `values` with this operation. Empty input yields the identity.
    pub fn fold(self, values: impl IntoIterator<Item = f64>) -> f64 {
        let it = values.into_iter();
        match self {
            Self::Min => it.fold(f64::INFINITY, f64::min),
            Self::Max => it.fold(f64::NEG_INFINITY, f64::max),
            Self::Sum => it.sum(),
        }
    }
}

/// A group of ranks that take part in collective operations together.
///
/// The trait is object-safe; the solver holds the world communicator as
/// `Box<dyn Communicator>` and hands out `&dyn Communicator` to
/// collaborators that need to reduce across the domain.
pub trait Communicator {
    /// This rank's index within the communicator.
    fn rank(&self) -> usize;

    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Block until every rank has reached the barrier.
    fn barrier(&self) -> Result<(), CommError>;

    /// Gather one byte buffer per rank at `root`.
    ///
    /// Returns `Some(buffers)` indexed by rank on the root, `None` elsewhere.
    fn gather_bytes(&self, bytes: &[u8], root: usize) -> Result<Option<Vec<Vec<u8>>>, CommError>;

    /// Send `bytes` from `root` to every rank. Non-root input is ignored.
    fn broadcast_bytes(&self, bytes: &[u8], root: usize) -> Result<Vec<u8>, CommError>;

    /// Split into sub-communicators of ranks sharing a memory domain (a node).
    ///
    /// Rank order within the result follows rank order in `self`.
    fn split_shared(&self) -> Result<Box<dyn Communicator>, CommError>;

    /// Terminate every rank of the job with `code`.
    fn abort(&self, code: i32) -> !;

    /// Gather one `f64` per rank at `root`.
    fn gather_f64(&self, value: f64, root: usize) -> Result<Option<Vec<f64>>, CommError> {
        let gathered = self.gather_bytes(&value.to_le_bytes(), root)?;
        gathered
            .map(|buffers| {
                buffers
                    .iter()
                    .map(|b| decode_f64(b))
                    .collect::<Result<Vec<f64>, CommError>>()
            })
            .transpose()
    }

    /// Reduce one `f64` per rank with `op` and return the result on every rank.
    fn all_reduce_f64(&self, value: f64, op: ReduceOp) -> Result<f64, CommError> {
        let reduced = self.gather_f64(value, 0)?.map(|values| op.fold(values));
        let payload = reduced.unwrap_or_default().to_le_bytes();
        decode_f64(&self.broadcast_bytes(&payload, 0)?)
    }

    /// Gather one byte buffer per rank on every rank.
    fn all_gather_bytes(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, CommError> {
        let gathered = self.gather_bytes(bytes, 0)?;
        let packed = gathered.map(|buffers| pack_buffers(&buffers)).unwrap_or_default();
        unpack_buffers(&self.broadcast_bytes(&packed, 0)?)
    }
}

/// Decode a little-endian `f64` from an 8-byte buffer.
pub fn decode_f64(bytes: &[u8]) -> Result<f64, CommError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| CommError::Malformed {
        detail: format!("expected 8 bytes for f64, got {}", bytes.len()),
    })?;
    Ok(f64::from_le_bytes(raw))
}

/// Decode a little-endian `u64` from an 8-byte buffer.
pub fn decode_u64(bytes: &[u8]) -> Result<u64, CommError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| CommError::Malformed {
        detail: format!("expected 8 bytes for u64, got {}", bytes.len()),
    })?;
    Ok(u64::from_le_bytes(raw))
}

/// Concatenate buffers with `u64` length prefixes.
pub fn pack_buffers(buffers: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = buffers.iter().map(|b| b.len() + 8).sum();
    let mut out = Vec::with_capacity(total + 8);
    out.extend_from_slice(&(buffers.len() as u64).to_le_bytes());
    for b in buffers {
        out.extend_from_slice(&(b.len() as u64).to_le_bytes());
        out.extend_from_slice(b);
    }
    out
}

/// Inverse of [`pack_buffers`].
pub fn unpack_buffers(mut bytes: &[u8]) -> Result<Vec<Vec<u8>>, CommError> {
    fn take_u64(bytes: &mut &[u8]) -> Result<u64, CommError> {
        if bytes.len() < 8 {
            return Err(CommError::Malformed {
                detail: "truncated length prefix".to_string(),
            });
        }
        let (head, rest) = bytes.split_at(8);
        *bytes = rest;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(head);
        Ok(u64::from_le_bytes(raw))
    }

    let count = take_u64(&mut bytes)? as usize;
    let mut out = Vec::with_capacity(count.min(bytes.len() / 8 + 1));
    for _ in 0..count {
        let len = take_u64(&mut bytes)? as usize;
        if bytes.len() < len {
            return Err(CommError::Malformed {
                detail: format!("buffer of {len} bytes truncated to {}", bytes.len()),
            });
        }
        let (head, rest) = bytes.split_at(len);
        out.push(head.to_vec());
        bytes = rest;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_identities() {
        assert_eq!(ReduceOp::Min.fold(Vec::new()), f64::INFINITY);
        assert_eq!(ReduceOp::Max.fold(Vec::new()), f64::NEG_INFINITY);
        assert_eq!(ReduceOp::Sum.fold(Vec::new()), 0.0);
        assert_eq!(ReduceOp::Min.fold([3.0, 1.0, 2.0]), 1.0);
        assert_eq!(ReduceOp::Max.fold([3.0, 1.0, 2.0]), 3.0);
        assert_eq!(ReduceOp::Sum.fold([3.0, 1.0, 2.0]), 6.0);
    }

    #[test]
    fn pack_unpack_preserves_empty_buffers() {
        let buffers = vec![b"abc".to_vec(), Vec::new(), b"z".to_vec()];
        assert_eq!(unpack_buffers(&pack_buffers(&buffers)).unwrap(), buffers);
        assert_eq!(unpack_buffers(&pack_buffers(&[])).unwrap(), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn unpack_rejects_truncation() {
        let mut packed = pack_buffers(&[b"abcdef".to_vec()]);
        packed.truncate(packed.len() - 2);
        assert!(matches!(
            unpack_buffers(&packed),
            Err(CommError::Malformed { .. })
        ));
    }

    #[test]
    fn decode_f64_checks_length() {
        assert_eq!(decode_f64(&2.5f64.to_le_bytes()), Ok(2.5));
        assert!(decode_f64(&[0u8; 4]).is_err());
    }
}
