//! Fixed-layout binary codec for the credentials program's accounts.
//!
//! Layout discipline: an 8-byte discriminator prefix, then fields in
//! declaration order. Integers are little-endian with no padding; strings
//! are `u32` length-prefixed; options carry a 1-byte tag. Decoding is
//! bounds-checked end to end and fails with [`CodecError`] rather than
//! panicking on hostile input. No I/O happens here.

use credo_std::{LessonBitmap, BITMAP_WORDS};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::state::{AchievementReceipt, AchievementType, Enrollment, ProgramConfig, MAX_ID_LEN};

pub const ENROLLMENT_DISCRIMINATOR: [u8; 8] = [11, 136, 54, 217, 20, 99, 174, 62];
pub const ACHIEVEMENT_TYPE_DISCRIMINATOR: [u8; 8] = [202, 68, 191, 13, 89, 146, 230, 41];
pub const RECEIPT_DISCRIMINATOR: [u8; 8] = [158, 24, 207, 92, 113, 76, 35, 180];
pub const CONFIG_DISCRIMINATOR: [u8; 8] = [71, 155, 9, 227, 64, 37, 118, 200];

#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum CodecError {
    #[error("buffer too short: need {needed} bytes, have {have}")]
    BufferTooShort { needed: usize, have: usize },

    #[error("unexpected account discriminator")]
    BadDiscriminator,

    #[error("declared length {declared} exceeds limit {limit}")]
    LengthOutOfBounds { declared: usize, limit: usize },

    #[error("string field is not valid utf-8")]
    InvalidUtf8,

    #[error("invalid option tag {0}")]
    BadOptionTag(u8),
}

pub trait AccountCodec: Sized {
    const DISCRIMINATOR: [u8; 8];

    fn decode(buf: &[u8]) -> Result<Self, CodecError>;
    fn encode(&self) -> Vec<u8>;
}

pub struct AccountReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> AccountReader<'a> {
    pub fn new(buf: &'a [u8], discriminator: &[u8; 8]) -> Result<Self, CodecError> {
        let mut reader = Self { buf, pos: 0 };
        if reader.take(8)? != discriminator {
            return Err(CodecError::BadDiscriminator);
        }
        Ok(reader)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(CodecError::BufferTooShort {
                needed: self.pos.saturating_add(len),
                have: self.buf.len(),
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_pubkey(&mut self) -> Result<Pubkey, CodecError> {
        Ok(Pubkey::new_from_array(self.take(32)?.try_into().unwrap()))
    }

    pub fn read_string(&mut self, limit: usize) -> Result<String, CodecError> {
        let declared = self.read_u32()? as usize;
        if declared > limit {
            return Err(CodecError::LengthOutOfBounds { declared, limit });
        }
        let bytes = self.take(declared)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_bitmap(&mut self) -> Result<LessonBitmap, CodecError> {
        let mut words = [0u64; BITMAP_WORDS];
        for word in &mut words {
            *word = self.read_u64()?;
        }
        Ok(LessonBitmap::from_words(words))
    }

    pub fn read_option_i64(&mut self) -> Result<Option<i64>, CodecError> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.read_i64()?)),
            tag => Err(CodecError::BadOptionTag(tag)),
        }
    }

    pub fn read_option_pubkey(&mut self) -> Result<Option<Pubkey>, CodecError> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.read_pubkey()?)),
            tag => Err(CodecError::BadOptionTag(tag)),
        }
    }
}

#[derive(Default)]
pub struct AccountWriter {
    buf: Vec<u8>,
}

impl AccountWriter {
    pub fn new(discriminator: &[u8; 8]) -> Self {
        Self {
            buf: discriminator.to_vec(),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_pubkey(&mut self, value: &Pubkey) {
        self.buf.extend_from_slice(value.as_ref());
    }

    pub fn write_string(&mut self, value: &str) {
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_bitmap(&mut self, bitmap: &LessonBitmap) {
        for word in bitmap.words() {
            self.write_u64(*word);
        }
    }

    pub fn write_option_i64(&mut self, value: Option<i64>) {
        match value {
            None => self.write_u8(0),
            Some(v) => {
                self.write_u8(1);
                self.write_i64(v);
            }
        }
    }

    pub fn write_option_pubkey(&mut self, value: Option<&Pubkey>) {
        match value {
            None => self.write_u8(0),
            Some(v) => {
                self.write_u8(1);
                self.write_pubkey(v);
            }
        }
    }
}

impl AccountCodec for Enrollment {
    const DISCRIMINATOR: [u8; 8] = ENROLLMENT_DISCRIMINATOR;

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = AccountReader::new(buf, &Self::DISCRIMINATOR)?;
        Ok(Self {
            learner: reader.read_pubkey()?,
            course_id: reader.read_string(MAX_ID_LEN)?,
            lesson_total: reader.read_u16()?,
            bitmap: reader.read_bitmap()?,
            finalized_at: reader.read_option_i64()?,
            credential_asset: reader.read_option_pubkey()?,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut writer = AccountWriter::new(&Self::DISCRIMINATOR);
        writer.write_pubkey(&self.learner);
        writer.write_string(&self.course_id);
        writer.write_u16(self.lesson_total);
        writer.write_bitmap(&self.bitmap);
        writer.write_option_i64(self.finalized_at);
        writer.write_option_pubkey(self.credential_asset.as_ref());
        writer.finish()
    }
}

impl AccountCodec for AchievementType {
    const DISCRIMINATOR: [u8; 8] = ACHIEVEMENT_TYPE_DISCRIMINATOR;

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = AccountReader::new(buf, &Self::DISCRIMINATOR)?;
        Ok(Self {
            achievement_id: reader.read_string(MAX_ID_LEN)?,
            authority: reader.read_pubkey()?,
            max_supply: reader.read_u64()?,
            current_supply: reader.read_u64()?,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut writer = AccountWriter::new(&Self::DISCRIMINATOR);
        writer.write_string(&self.achievement_id);
        writer.write_pubkey(&self.authority);
        writer.write_u64(self.max_supply);
        writer.write_u64(self.current_supply);
        writer.finish()
    }
}

impl AccountCodec for AchievementReceipt {
    const DISCRIMINATOR: [u8; 8] = RECEIPT_DISCRIMINATOR;

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = AccountReader::new(buf, &Self::DISCRIMINATOR)?;
        Ok(Self {
            achievement_id: reader.read_string(MAX_ID_LEN)?,
            learner: reader.read_pubkey()?,
            asset: reader.read_pubkey()?,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut writer = AccountWriter::new(&Self::DISCRIMINATOR);
        writer.write_string(&self.achievement_id);
        writer.write_pubkey(&self.learner);
        writer.write_pubkey(&self.asset);
        writer.finish()
    }
}

impl AccountCodec for ProgramConfig {
    const DISCRIMINATOR: [u8; 8] = CONFIG_DISCRIMINATOR;

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = AccountReader::new(buf, &Self::DISCRIMINATOR)?;
        Ok(Self {
            authority: reader.read_pubkey()?,
            paused: reader.read_bool()?,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut writer = AccountWriter::new(&Self::DISCRIMINATOR);
        writer.write_pubkey(&self.authority);
        writer.write_bool(self.paused);
        writer.finish()
    }
}
