#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Flash image of the system record.
//!
//! The whole record is rewritten on every save. An erased page, or one whose
//! checksum does not match, opens as an empty record so the board still boots.

use flow_core::persistence::{
    FIELD_TEXT_CAPACITY, Field, FieldText, FieldValue, MemoryStore, Store, StoreError,
};

/// Encoded record length, a whole number of flash double-words.
pub const IMAGE_LEN: usize = 56;

pub type RecordImage = [u8; IMAGE_LEN];

const MAGIC: [u8; 4] = *b"FLW1";
const FLAGS: usize = 4;
const STATE: usize = 8;
const COUNTER: usize = 12;
const SERIAL: usize = 16;
const VERSION: usize = SERIAL + TEXT_SLOT;
const CHECKSUM: usize = IMAGE_LEN - 4;
const TEXT_SLOT: usize = 1 + FIELD_TEXT_CAPACITY;

const HAS_STATE: u8 = 1 << 0;
const HAS_SERIAL: u8 = 1 << 1;
const HAS_VERSION: u8 = 1 << 2;
const HAS_COUNTER: u8 = 1 << 3;

/// Access to the memory holding one [`RecordImage`].
pub trait RecordFlash {
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the memory cannot be read.
    fn read_image(&mut self, image: &mut RecordImage) -> Result<(), StoreError>;

    /// Erases and rewrites the stored image.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the erase or write fails.
    fn write_image(&mut self, image: &RecordImage) -> Result<(), StoreError>;
}

/// [`Store`] that serves loads from RAM and writes the full image back on
/// every save.
pub struct FlashStore<F> {
    flash: F,
    record: MemoryStore,
    blank: bool,
}

impl<F> FlashStore<F>
where
    F: RecordFlash,
{
    /// Reads the stored image.
    ///
    /// # Errors
    ///
    /// Propagates the read failure. Invalid images are not an error.
    pub fn open(mut flash: F) -> Result<Self, StoreError> {
        let mut image = [0u8; IMAGE_LEN];
        flash.read_image(&mut image)?;
        let decoded = decode(&image);
        Ok(Self {
            flash,
            blank: decoded.is_none(),
            record: decoded.unwrap_or_default(),
        })
    }

    /// Fills in identity fields the stored record lacks. Saved values win.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TooLong`] or the write failure.
    pub fn with_default_identity(mut self, serial: &str, version: &str) -> Result<Self, StoreError> {
        let mut changed = false;
        for (field, text) in [
            (Field::SerialNumber, serial),
            (Field::FirmwareVersion, version),
        ] {
            if self.record.load(field)?.is_none() {
                self.record
                    .save(field, &FieldValue::Text(field_text(field, text)?))?;
                changed = true;
            }
        }
        if changed {
            self.flush()?;
        }
        Ok(self)
    }

    /// True when [`Self::open`] found no valid image.
    #[must_use]
    pub fn was_blank(&self) -> bool {
        self.blank
    }

    #[must_use]
    pub fn flash(&self) -> &F {
        &self.flash
    }

    #[must_use]
    pub fn into_flash(self) -> F {
        self.flash
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        let image = encode(&mut self.record);
        self.flash.write_image(&image)
    }
}

impl<F> Store for FlashStore<F>
where
    F: RecordFlash,
{
    fn load(&mut self, field: Field) -> Result<Option<FieldValue>, StoreError> {
        self.record.load(field)
    }

    fn save(&mut self, field: Field, value: &FieldValue) -> Result<(), StoreError> {
        self.record.save(field, value)?;
        self.flush()
    }
}

fn encode(record: &mut MemoryStore) -> RecordImage {
    let mut image = [0u8; IMAGE_LEN];
    image[..MAGIC.len()].copy_from_slice(&MAGIC);

    let mut flags = 0;
    if let Some(code) = record.raw_state() {
        flags |= HAS_STATE;
        image[STATE..STATE + 4].copy_from_slice(&code.to_le_bytes());
    }
    if let Some(count) = record.startup_counter() {
        flags |= HAS_COUNTER;
        image[COUNTER..COUNTER + 4].copy_from_slice(&count.to_le_bytes());
    }
    if let Ok(Some(FieldValue::Text(serial))) = record.load(Field::SerialNumber) {
        flags |= HAS_SERIAL;
        put_text(&mut image[SERIAL..SERIAL + TEXT_SLOT], &serial);
    }
    if let Ok(Some(FieldValue::Text(version))) = record.load(Field::FirmwareVersion) {
        flags |= HAS_VERSION;
        put_text(&mut image[VERSION..VERSION + TEXT_SLOT], &version);
    }
    image[FLAGS] = flags;

    let sum = checksum(&image[..CHECKSUM]);
    image[CHECKSUM..].copy_from_slice(&sum.to_le_bytes());
    image
}

fn decode(image: &RecordImage) -> Option<MemoryStore> {
    let (body, stored) = image.split_at(CHECKSUM);
    if !body.starts_with(&MAGIC) || u32::from_le_bytes(stored.try_into().ok()?) != checksum(body) {
        return None;
    }

    let flags = body[FLAGS];
    let mut record = MemoryStore::new();
    if flags & HAS_STATE != 0 {
        record.set_raw_state(word_at(body, STATE)?);
    }
    if flags & HAS_COUNTER != 0 {
        let count = word_at(body, COUNTER)?;
        record
            .save(Field::StartupCounter, &FieldValue::Counter(count))
            .ok()?;
    }
    for (flag, field, offset) in [
        (HAS_SERIAL, Field::SerialNumber, SERIAL),
        (HAS_VERSION, Field::FirmwareVersion, VERSION),
    ] {
        if flags & flag != 0 {
            let text = text_at(body, offset)?;
            record.save(field, &FieldValue::Text(text)).ok()?;
        }
    }
    Some(record)
}

fn put_text(slot: &mut [u8], text: &FieldText) {
    let bytes = text.as_bytes();
    slot[0] = u8::try_from(bytes.len()).unwrap_or(u8::MAX);
    slot[1..=bytes.len()].copy_from_slice(bytes);
}

fn word_at(body: &[u8], offset: usize) -> Option<u32> {
    let bytes = body.get(offset..offset + 4)?;
    bytes.try_into().ok().map(u32::from_le_bytes)
}

fn text_at(body: &[u8], offset: usize) -> Option<FieldText> {
    let (&len, bytes) = body.get(offset..offset + TEXT_SLOT)?.split_first()?;
    let text = core::str::from_utf8(bytes.get(..usize::from(len))?).ok()?;
    let mut field = FieldText::new();
    field.push_str(text).ok()?;
    Some(field)
}

fn field_text(field: Field, value: &str) -> Result<FieldText, StoreError> {
    let mut text = FieldText::new();
    text.push_str(value).map_err(|_| StoreError::TooLong(field))?;
    Ok(text)
}

/// FNV-1a.
fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811C_9DC5, |hash, &byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}
