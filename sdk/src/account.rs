use crate::clock::{Epoch, Lamports};
use crate::pubkey::Pubkey;
use crate::SdkError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

/// An account record as held by the account store. Identity is `key`; the
/// store exclusively owns each record and execution contexts stage copies.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct Account {
    /// the address this account lives at
    pub key: Pubkey,
    /// the program that owns this account
    pub owner: Pubkey,
    /// lamports in the account
    pub lamports: Lamports,
    /// data held in this account
    pub data: Vec<u8>,
    /// this account's data is executable bytecode
    pub executable: bool,
    /// the epoch at which this account will next owe rent
    pub rent_epoch: Epoch,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Account {{ key: {} owner: {} lamports: {} data.len: {} executable: {} rent_epoch: {} }}",
            self.key,
            self.owner,
            self.lamports,
            self.data.len(),
            self.executable,
            self.rent_epoch,
        )
    }
}

impl Account {
    pub fn new(key: Pubkey, lamports: Lamports, owner: Pubkey) -> Self {
        Self {
            key,
            owner,
            lamports,
            ..Self::default()
        }
    }

    pub fn new_data(key: Pubkey, lamports: Lamports, owner: Pubkey, data: Vec<u8>) -> Self {
        Self {
            key,
            owner,
            lamports,
            data,
            ..Self::default()
        }
    }

    /// Build an executable account whose data is bytecode owned by `loader`.
    pub fn new_executable(key: Pubkey, lamports: Lamports, loader: Pubkey, code: Vec<u8>) -> Self {
        Self {
            key,
            owner: loader,
            lamports,
            data: code,
            executable: true,
            rent_epoch: 0,
        }
    }

    /// Serialize to the migration wire layout: key, owner, lamports (LE u64),
    /// executable (u8), rent_epoch (LE u64), data_len (LE u32), data.
    pub fn serialize(&self) -> Vec<u8> {
        let mut wr = Vec::with_capacity(32 + 32 + 8 + 1 + 8 + 4 + self.data.len());
        wr.extend_from_slice(self.key.as_ref());
        wr.extend_from_slice(self.owner.as_ref());
        wr.write_u64::<LittleEndian>(self.lamports).expect("vec write");
        wr.push(self.executable as u8);
        wr.write_u64::<LittleEndian>(self.rent_epoch).expect("vec write");
        wr.write_u32::<LittleEndian>(self.data.len() as u32)
            .expect("vec write");
        wr.extend_from_slice(&self.data);
        wr
    }

    pub fn deserialize(input: &[u8]) -> Result<Self, SdkError> {
        const FIXED: usize = 32 + 32 + 8 + 1 + 8 + 4;
        if input.len() < FIXED {
            return Err(SdkError::Truncated {
                needed: FIXED,
                had: input.len(),
            });
        }
        let mut rd = input;
        let mut key = [0u8; 32];
        rd.read_exact(&mut key).expect("length checked");
        let mut owner = [0u8; 32];
        rd.read_exact(&mut owner).expect("length checked");
        let lamports = rd.read_u64::<LittleEndian>().expect("length checked");
        let executable = match rd.read_u8().expect("length checked") {
            0 => false,
            1 => true,
            other => {
                return Err(SdkError::InvalidEncoding(format!(
                    "executable flag must be 0 or 1, got {other}"
                )))
            }
        };
        let rent_epoch = rd.read_u64::<LittleEndian>().expect("length checked");
        let data_len = rd.read_u32::<LittleEndian>().expect("length checked") as usize;
        if rd.len() < data_len {
            return Err(SdkError::Truncated {
                needed: FIXED + data_len,
                had: input.len(),
            });
        }
        Ok(Self {
            key: Pubkey::new_from_array(key),
            owner: Pubkey::new_from_array(owner),
            lamports,
            data: rd[..data_len].to_vec(),
            executable,
            rent_epoch,
        })
    }
}
