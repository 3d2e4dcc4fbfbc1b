//! # Firmware Update
//!
//! Flash layout of the power controller and the update procedure.
//!
//! The controller's flash is word-addressed (two bytes per word). Intel-HEX
//! records carry byte addresses; erase and program commands carry the word
//! address of the page start, i.e. the byte address halved.
//!
//! ```text
//! 0x0000..=0x03FF  IVT          (8 pages, erased and reprogrammed)
//! 0x0400..=0x1BFF  bootloader   (never touched)
//! 0x1C00..=0x57FF  application  (120 pages, erased and reprogrammed)
//! ```

pub mod hex;
pub mod update;

/// Flash page size in words
pub const FLASH_PAGE_SIZE_WORDS: usize = 64;

/// Flash page size in bytes
pub const FLASH_PAGE_SIZE_BYTES: usize = FLASH_PAGE_SIZE_WORDS * 2;

/// Value of an erased flash byte
pub const FLASH_ERASED_BYTE: u8 = 0xFF;

/// A contiguous, inclusive range of flash byte addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegion {
    pub name: &'static str,
    pub start: u32,
    pub end: u32,
}

/// Interrupt vector table
pub const IVT_REGION: FlashRegion = FlashRegion {
    name: "IVT",
    start: 0x0000,
    end: 0x03FF,
};

/// User application
pub const APP_REGION: FlashRegion = FlashRegion {
    name: "application",
    start: 0x1C00,
    end: 0x57FF,
};

/// Regions rewritten by an update, in erase order
pub const UPDATE_REGIONS: [FlashRegion; 2] = [IVT_REGION, APP_REGION];

impl FlashRegion {
    pub fn contains(&self, address: u32) -> bool {
        (self.start..=self.end).contains(&address)
    }

    /// Byte address of every page start in the region
    pub fn page_addresses(&self) -> impl Iterator<Item = u32> {
        (self.start..=self.end).step_by(FLASH_PAGE_SIZE_BYTES)
    }

    pub fn page_count(&self) -> usize {
        (self.end - self.start + 1) as usize / FLASH_PAGE_SIZE_BYTES
    }
}

/// Region containing `address`, if it is one that an update may write
pub fn region_of(address: u32) -> Option<&'static FlashRegion> {
    UPDATE_REGIONS.iter().find(|region| region.contains(address))
}

/// Byte address to the controller's word address
pub fn word_address(byte_address: u32) -> u32 {
    byte_address >> 1
}

/// Start of the page containing `byte_address`
pub fn page_base(byte_address: u32) -> u32 {
    byte_address & !(FLASH_PAGE_SIZE_BYTES as u32 - 1)
}

/// One data record of a flash image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Byte address of the first data byte
    pub address: u32,
    pub data: Vec<u8>,
}

impl HexRecord {
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    /// Address of the last data byte
    pub fn end_address(&self) -> u32 {
        self.address + self.data.len().saturating_sub(1) as u32
    }
}
