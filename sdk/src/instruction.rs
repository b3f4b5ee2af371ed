use crate::pubkey::Pubkey;
use crate::SdkError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde_derive::{Deserialize, Serialize};
use std::io::Read;

/// A single program invocation. The order of `accounts` is the program's
/// parameter vector and is semantically significant.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Instruction {
    /// the program that executes this instruction
    pub program_id: Pubkey,
    /// ordered account parameters
    pub accounts: Vec<Pubkey>,
    /// opaque program input
    pub data: Vec<u8>,
}

impl Instruction {
    pub fn new(program_id: Pubkey, accounts: Vec<Pubkey>, data: Vec<u8>) -> Self {
        Self {
            program_id,
            accounts,
            data,
        }
    }

    /// Convenience constructor for builtin payloads carried as bincode.
    pub fn new_with_bincode<T: serde::Serialize>(
        program_id: Pubkey,
        payload: &T,
        accounts: Vec<Pubkey>,
    ) -> Self {
        let data = bincode::serialize(payload).expect("payload must serialize");
        Self::new(program_id, accounts, data)
    }

    /// Serialize to the wire layout: program_id, accounts_count (u8),
    /// account keys, data_len (LE u32), data.
    pub fn serialize(&self) -> Vec<u8> {
        let mut wr = Vec::with_capacity(32 + 1 + 32 * self.accounts.len() + 4 + self.data.len());
        wr.extend_from_slice(self.program_id.as_ref());
        wr.push(self.accounts.len() as u8);
        for key in &self.accounts {
            wr.extend_from_slice(key.as_ref());
        }
        wr.write_u32::<LittleEndian>(self.data.len() as u32)
            .expect("vec write");
        wr.extend_from_slice(&self.data);
        wr
    }

    pub fn deserialize(input: &[u8]) -> Result<Self, SdkError> {
        if input.len() < 33 {
            return Err(SdkError::Truncated {
                needed: 33,
                had: input.len(),
            });
        }
        let mut rd = input;
        let mut program_id = [0u8; 32];
        rd.read_exact(&mut program_id).expect("length checked");
        let accounts_count = rd.read_u8().expect("length checked") as usize;
        let needed = 33 + 32 * accounts_count + 4;
        if input.len() < needed {
            return Err(SdkError::Truncated {
                needed,
                had: input.len(),
            });
        }
        let mut accounts = Vec::with_capacity(accounts_count);
        for _ in 0..accounts_count {
            let mut key = [0u8; 32];
            rd.read_exact(&mut key).expect("length checked");
            accounts.push(Pubkey::new_from_array(key));
        }
        let data_len = rd.read_u32::<LittleEndian>().expect("length checked") as usize;
        if rd.len() < data_len {
            return Err(SdkError::Truncated {
                needed: needed + data_len,
                had: input.len(),
            });
        }
        Ok(Self {
            program_id: Pubkey::new_from_array(program_id),
            accounts,
            data: rd[..data_len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_roundtrip() {
        let ix = Instruction::new(
            Pubkey::new_rand(),
            vec![Pubkey::new_rand(), Pubkey::new_rand()],
            vec![9, 8, 7],
        );
        assert_eq!(Instruction::deserialize(&ix.serialize()).unwrap(), ix);
    }

    #[test]
    fn test_account_order_is_preserved() {
        let a = Pubkey::new_rand();
        let b = Pubkey::new_rand();
        let ix = Instruction::new(Pubkey::new_rand(), vec![a, b], vec![]);
        let rt = Instruction::deserialize(&ix.serialize()).unwrap();
        assert_eq!(rt.accounts, vec![a, b]);
    }

    #[test]
    fn test_deserialize_truncated_accounts() {
        let ix = Instruction::new(Pubkey::new_rand(), vec![Pubkey::new_rand()], vec![]);
        let bytes = ix.serialize();
        assert!(matches!(
            Instruction::deserialize(&bytes[..40]),
            Err(SdkError::Truncated { .. })
        ));
    }
}
