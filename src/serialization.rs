//! Canonical encoding of transactions and blocks
//!
//! The encoding is what gets hashed and what counts towards the block size
//! limit, so it must be identical across implementations.
//!
//! - Integers are little-endian
//! - Lengths are CompactSize varints (`<0xfd`, `0xfd`+u16, `0xfe`+u32, `0xff`+u64)
//! - The nonce is a length-prefixed big-endian byte string

use num_bigint::BigUint;

use crate::error::{ConsensusError, Result};
use crate::types::*;

/// Encode a u64 as a CompactSize varint
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut result = vec![0xfd];
        result.extend_from_slice(&(value as u16).to_le_bytes());
        result
    } else if value <= 0xffff_ffff {
        let mut result = vec![0xfe];
        result.extend_from_slice(&(value as u32).to_le_bytes());
        result
    } else {
        let mut result = vec![0xff];
        result.extend_from_slice(&value.to_le_bytes());
        result
    }
}

fn write_bytes(buffer: &mut Vec<u8>, bytes: &[u8]) {
    buffer.extend_from_slice(&encode_varint(bytes.len() as u64));
    buffer.extend_from_slice(bytes);
}

fn write_nonce(buffer: &mut Vec<u8>, nonce: &BigUint) {
    // Zero encodes as the empty string
    let bytes = if nonce.bits() == 0 {
        Vec::new()
    } else {
        nonce.to_bytes_be()
    };
    write_bytes(buffer, &bytes);
}

fn write_unsigned_transaction(buffer: &mut Vec<u8>, tx: &Transaction) {
    buffer.extend_from_slice(&encode_varint(tx.inputs.len() as u64));
    for input in &tx.inputs {
        buffer.extend_from_slice(&input.referenced_transaction);
        buffer.extend_from_slice(&input.referenced_output_index.to_le_bytes());
    }

    buffer.extend_from_slice(&encode_varint(tx.outputs.len() as u64));
    for output in &tx.outputs {
        buffer.extend_from_slice(&output.address);
        buffer.extend_from_slice(&output.amount.to_le_bytes());
    }

    match tx.coinbase_height {
        Some(height) => {
            buffer.push(1);
            buffer.extend_from_slice(&height.to_le_bytes());
        }
        None => buffer.push(0),
    }
}

/// Encoding without signatures: the preimage of the transaction hash
pub fn serialize_unsigned_transaction(tx: &Transaction) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(2 + tx.inputs.len() * 36 + tx.outputs.len() * 28 + 9);
    write_unsigned_transaction(&mut buffer, tx);
    buffer
}

/// Full encoding: unsigned form followed by each input's signature
pub fn serialize_transaction(tx: &Transaction) -> Vec<u8> {
    let mut buffer = serialize_unsigned_transaction(tx);
    for input in &tx.inputs {
        write_bytes(&mut buffer, &input.signature.public_key);
        write_bytes(&mut buffer, &input.signature.signature);
    }
    buffer
}

/// Header encoding: the preimage of the block hash
pub fn serialize_block_header(block: &Block) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(32 * 3 + 1 + 16 + 8 + 4);
    buffer.extend_from_slice(&block.previous_block_hash);
    buffer.extend_from_slice(&block.merkle_root);
    buffer.extend_from_slice(&block.target_value);
    write_nonce(&mut buffer, &block.nonce);
    buffer.extend_from_slice(&block.block_height.to_le_bytes());
    buffer.extend_from_slice(&block.network_id.to_le_bytes());
    buffer
}

pub fn serialize_block(block: &Block) -> Vec<u8> {
    let mut buffer = serialize_block_header(block);
    buffer.extend_from_slice(&encode_varint(block.transactions.len() as u64));
    for tx in &block.transactions {
        buffer.extend_from_slice(&serialize_transaction(tx));
    }
    buffer
}

/// Size in bytes of the full block encoding
pub fn serialized_block_size(block: &Block) -> usize {
    serialize_block(block).len()
}

/// Cursor over an encoded byte string
struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                ConsensusError::Serialization(format!(
                    "Unexpected end of data at offset {} (wanted {} bytes)",
                    self.position, count
                ))
            })?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn varint(&mut self) -> Result<u64> {
        match self.u8()? {
            0xff => self.u64(),
            0xfe => Ok(self.u32()? as u64),
            0xfd => Ok(u16::from_le_bytes(self.array()?) as u64),
            small => Ok(small as u64),
        }
    }

    /// Length prefix, bounded by the bytes actually left
    fn length(&mut self) -> Result<usize> {
        let length = self.varint()?;
        let remaining = (self.data.len() - self.position) as u64;
        if length > remaining {
            return Err(ConsensusError::Serialization(format!(
                "Declared length {} exceeds remaining {} bytes",
                length, remaining
            )));
        }
        Ok(length as usize)
    }

    fn bytes(&mut self) -> Result<ByteString> {
        let length = self.length()?;
        Ok(self.take(length)?.to_vec())
    }

    fn is_empty(&self) -> bool {
        self.position == self.data.len()
    }
}

fn read_transaction(reader: &mut Reader<'_>) -> Result<Transaction> {
    let input_count = reader.length()?;
    let mut inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        let referenced_transaction = reader.array::<32>()?;
        let referenced_output_index = reader.u32()?;
        inputs.push(Input::new(referenced_transaction, referenced_output_index));
    }

    let output_count = reader.length()?;
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        let address = reader.array::<20>()?;
        let amount = reader.i64()?;
        outputs.push(Output { address, amount });
    }

    let coinbase_height = match reader.u8()? {
        0 => None,
        1 => Some(reader.u64()?),
        flag => {
            return Err(ConsensusError::Serialization(format!(
                "Invalid coinbase flag {}",
                flag
            )))
        }
    };

    for input in &mut inputs {
        input.signature.public_key = reader.bytes()?;
        input.signature.signature = reader.bytes()?;
    }

    Ok(Transaction {
        inputs,
        outputs,
        coinbase_height,
    })
}

/// Decode a full block encoding; trailing bytes are rejected
pub fn deserialize_block(data: &[u8]) -> Result<Block> {
    let mut reader = Reader::new(data);
    let previous_block_hash = reader.array::<32>()?;
    let merkle_root = reader.array::<32>()?;
    let target_value = reader.array::<32>()?;
    let nonce = BigUint::from_bytes_be(&reader.bytes()?);
    let block_height = reader.u64()?;
    let network_id = reader.u32()?;

    let transaction_count = reader.length()?;
    let mut transactions = Vec::with_capacity(transaction_count);
    for _ in 0..transaction_count {
        transactions.push(read_transaction(&mut reader)?);
    }

    if !reader.is_empty() {
        return Err(ConsensusError::Serialization(format!(
            "{} trailing bytes after block",
            data.len() - reader.position
        )));
    }

    Ok(Block {
        previous_block_hash,
        merkle_root,
        target_value,
        nonce,
        block_height,
        transactions,
        network_id,
    })
}
