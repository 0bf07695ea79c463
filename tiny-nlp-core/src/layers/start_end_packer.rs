//! Pack variable length token sequences into a dense, fixed width batch.

use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Adds optional start/end markers, truncates and right pads every sequence
/// to `sequence_length`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartEndPacker {
    pub sequence_length: usize,
    pub start_value: Option<u32>,
    pub end_value: Option<u32>,
    #[serde(default)]
    pub pad_value: u32,
}

/// Per-call overrides of [`StartEndPacker`] settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackOptions {
    pub sequence_length: Option<usize>,
    pub add_start_value: bool,
    pub add_end_value: bool,
}

impl StartEndPacker {
    pub fn new(sequence_length: usize) -> Result<Self> {
        if sequence_length == 0 {
            return Err(Error::config("sequence_length must be at least 1"));
        }
        Ok(Self {
            sequence_length,
            start_value: None,
            end_value: None,
            pad_value: 0,
        })
    }

    pub fn with_start_value(mut self, value: u32) -> Self {
        self.start_value = Some(value);
        self
    }

    pub fn with_end_value(mut self, value: u32) -> Self {
        self.end_value = Some(value);
        self
    }

    pub fn with_pad_value(mut self, value: u32) -> Self {
        self.pad_value = value;
        self
    }

    /// Pack with both markers enabled where configured.
    pub fn pack(&self, sequences: &[Vec<u32>]) -> Result<(Array2<i64>, Array2<u8>)> {
        self.pack_with(
            sequences,
            PackOptions {
                sequence_length: None,
                add_start_value: true,
                add_end_value: true,
            },
        )
    }

    /// Returns `(token_ids, padding_mask)`, both `(batch, sequence_length)`.
    /// The mask is 1 for content and markers and 0 for padding.
    pub fn pack_with(
        &self,
        sequences: &[Vec<u32>],
        options: PackOptions,
    ) -> Result<(Array2<i64>, Array2<u8>)> {
        let length = options.sequence_length.unwrap_or(self.sequence_length);
        let start = self.start_value.filter(|_| options.add_start_value);
        let end = self.end_value.filter(|_| options.add_end_value);
        let reserved = usize::from(start.is_some()) + usize::from(end.is_some());
        if length < reserved {
            return Err(Error::config(format!(
                "sequence_length {length} cannot hold {reserved} start/end markers"
            )));
        }
        let room = length - reserved;

        let mut token_ids = Array2::from_elem((sequences.len(), length), self.pad_value as i64);
        let mut padding_mask = Array2::zeros((sequences.len(), length));
        for (row, tokens) in sequences.iter().enumerate() {
            if tokens.len() > room {
                debug!("truncating sequence {row} from {} to {room} tokens", tokens.len());
            }
            let packed = start
                .into_iter()
                .chain(tokens.iter().copied().take(room))
                .chain(end);
            for (col, id) in packed.enumerate() {
                token_ids[[row, col]] = id as i64;
                padding_mask[[row, col]] = 1;
            }
        }
        Ok((token_ids, padding_mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn packer() -> StartEndPacker {
        StartEndPacker::new(6)
            .unwrap()
            .with_start_value(1)
            .with_end_value(2)
    }

    #[test]
    fn test_pack_pads_and_marks() {
        let (ids, mask) = packer().pack(&[vec![5, 6, 7], vec![8]]).unwrap();
        assert_eq!(ids, array![[1, 5, 6, 7, 2, 0], [1, 8, 2, 0, 0, 0]]);
        assert_eq!(mask, array![[1, 1, 1, 1, 1, 0], [1, 1, 1, 0, 0, 0]]);
    }

    #[test]
    fn test_truncation_keeps_markers() {
        let (ids, _) = packer().pack(&[vec![5, 6, 7, 8, 9, 10, 11]]).unwrap();
        assert_eq!(ids, array![[1, 5, 6, 7, 8, 2]]);
    }

    #[test]
    fn test_overrides() {
        let options = PackOptions {
            sequence_length: Some(3),
            add_start_value: false,
            add_end_value: true,
        };
        let (ids, mask) = packer().with_pad_value(9).pack_with(&[vec![5]], options).unwrap();
        assert_eq!(ids, array![[5, 2, 9]]);
        assert_eq!(mask, array![[1, 1, 0]]);
    }

    #[test]
    fn test_too_short_for_markers() {
        let options = PackOptions {
            sequence_length: Some(1),
            add_start_value: true,
            add_end_value: true,
        };
        assert!(matches!(
            packer().pack_with(&[vec![5]], options),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(StartEndPacker::new(0).is_err());
    }
}
