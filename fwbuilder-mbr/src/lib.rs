#![doc = include_str!("../README.md")]

use core::iter::zip;
use std::{
    fs::File,
    io::{self, Seek as _, Write as _},
};

use bit_field::BitField as _;
use log::debug;
use part::{
    build_layout, div_round_up, num_cast, start_end_to_size, PartitionLayout, PartitionLayoutHint,
    HEADS_PER_CYLINDER, LBA_SIZE, SECTORS_PER_TRACK,
};

const MBR_LBA_OFFSET: usize = 0;
const MBR_LBA_SIZE: usize = 1;
const MBR_DISK_ID_OFFSET_BYTES: usize = 440;
const MBR_PART_ENTRY_OFFSET_BYTES: usize = 446;
const MBR_PART_ENTRY_SIZE_BYTES: usize = 16;
const MBR_PRIMARY_ENTRIES: usize = 4;
const MBR_SIGNATURE_OFFSET_BYTES: usize = 510;

const CHS_MAX_CYLINDER: usize = (1 << 10) - 1;

/// Partition type of a CHS-addressed extended partition
pub const EXTENDED_PARTITION_TYPE: u8 = 0x05;

/// Partition type of an LBA-addressed extended partition
pub const EXTENDED_LBA_PARTITION_TYPE: u8 = 0x0f;

const EXTENDED_LINUX_PARTITION_TYPE: u8 = 0x85;

/// Returns whether a partition type denotes an extended partition
#[must_use]
pub fn is_extended_type(part_type: u8) -> bool {
    matches!(
        part_type,
        EXTENDED_PARTITION_TYPE | EXTENDED_LBA_PARTITION_TYPE | EXTENDED_LINUX_PARTITION_TYPE
    )
}

fn invalid_input(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.into())
}

fn to_u32(val: usize, what: &str) -> Result<u32, io::Error> {
    u32::try_from(val).map_err(|_err| invalid_input(format!("{what} doesn't fit in an MBR entry")))
}

/// An MBR Partition Entry
#[derive(Debug)]
pub struct MasterBootRecordPartition {
    builder: MasterBootRecordPartitionBuilder,
}

/// An MBR Partition Entry Builder Structure
#[derive(Debug)]
pub struct MasterBootRecordPartitionBuilder {
    type_: u8,
    offset_lba: Option<usize>,
    size_lba: Option<usize>,
    bits: u8,
}

impl MasterBootRecordPartitionBuilder {
    /// Creates a new MBR Partition Builder of a specified type
    #[must_use]
    pub fn new(part_type: u8) -> Self {
        Self {
            type_: part_type,
            offset_lba: None,
            size_lba: None,
            bits: 0,
        }
    }

    /// Sets the partition offset in LBAs from the start of the device.
    ///
    /// If the offset isn't provided, the partition starts right after the
    /// previous one. Logical partitions always need an explicit offset.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset_lba = Some(offset);
        self
    }

    /// Sets the partition size in bytes, rounded up to the next LBA.
    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.size_lba = Some(div_round_up(size, LBA_SIZE));
        self
    }

    /// Sets the partition size in LBAs.
    #[must_use]
    pub fn size_lba(mut self, size: usize) -> Self {
        self.size_lba = Some(size);
        self
    }

    /// Marks the partition as bootable.
    #[must_use]
    pub fn bootable(mut self, val: bool) -> Self {
        self.bits.set_bit(7, val);
        self
    }

    /// Creates a [`MasterBootRecordPartition`] from our builder
    #[must_use]
    pub fn build(self) -> MasterBootRecordPartition {
        MasterBootRecordPartition { builder: self }
    }
}

#[derive(Debug)]
struct LogicalPartition {
    ebr_lba: usize,
    part: MasterBootRecordPartition,
}

/// A sector to write on the device, along with its location
type Sector = (usize, [u8; LBA_SIZE]);

/// an MBR Partition Table Representation
#[derive(Debug)]
pub struct MasterBootRecordPartitionTable {
    builder: MasterBootRecordPartitionTableBuilder,
}

impl MasterBootRecordPartitionTable {
    fn lba_to_chs_bytes(lba: usize) -> [u8; 3] {
        let c = lba / (HEADS_PER_CYLINDER * SECTORS_PER_TRACK);
        if c > CHS_MAX_CYLINDER {
            return [0xfe, 0xff, 0xff];
        }

        let h = num_cast!(u8, (lba / SECTORS_PER_TRACK) % HEADS_PER_CYLINDER);
        let s = num_cast!(u8, (lba % SECTORS_PER_TRACK) + 1);
        let c_lo = num_cast!(u8, c & 0xff);
        let c_hi = num_cast!(u8, (c >> 8) & 0x3);

        [h, (c_hi << 6) | (s & 0x3f), c_lo]
    }

    fn encode_entry(
        bits: u8,
        part_type: u8,
        layout: PartitionLayout,
        relative_to: usize,
    ) -> Result<[u8; MBR_PART_ENTRY_SIZE_BYTES], io::Error> {
        let mut entry = [0u8; MBR_PART_ENTRY_SIZE_BYTES];

        entry[0] = bits;
        entry[1..4].copy_from_slice(&Self::lba_to_chs_bytes(layout.start_lba));
        entry[4] = part_type;
        entry[5..8].copy_from_slice(&Self::lba_to_chs_bytes(layout.end_lba));

        let start = to_u32(layout.start_lba - relative_to, "Partition start")?;
        entry[8..12].copy_from_slice(&start.to_le_bytes());

        let size = to_u32(
            start_end_to_size(layout.start_lba, layout.end_lba),
            "Partition size",
        )?;
        entry[12..16].copy_from_slice(&size.to_le_bytes());

        Ok(entry)
    }

    fn set_entry(sector: &mut [u8; LBA_SIZE], idx: usize, entry: &[u8; MBR_PART_ENTRY_SIZE_BYTES]) {
        let offset = MBR_PART_ENTRY_OFFSET_BYTES + MBR_PART_ENTRY_SIZE_BYTES * idx;

        sector[offset..(offset + MBR_PART_ENTRY_SIZE_BYTES)].copy_from_slice(entry);
    }

    fn set_signature(sector: &mut [u8; LBA_SIZE]) {
        sector[MBR_SIGNATURE_OFFSET_BYTES] = 0x55;
        sector[MBR_SIGNATURE_OFFSET_BYTES + 1] = 0xaa;
    }

    fn primary_layout(&self, blocks: usize) -> Result<Vec<PartitionLayout>, io::Error> {
        let first_usable_lba = MBR_LBA_OFFSET + MBR_LBA_SIZE;
        debug!("First Usable LBA: {first_usable_lba}");

        if blocks <= first_usable_lba {
            return Err(invalid_input("File is too small"));
        }

        let last_usable_lba = blocks - 1;
        debug!("Last Usable LBA: {last_usable_lba}");

        let hints = self
            .builder
            .partitions
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                Ok(PartitionLayoutHint {
                    offset_lba: p.builder.offset_lba,
                    size_lba: p
                        .builder
                        .size_lba
                        .ok_or_else(|| invalid_input(format!("Partition {idx}: Missing size")))?,
                })
            })
            .collect::<Result<Vec<_>, io::Error>>()?;

        build_layout(first_usable_lba, last_usable_lba, 1, &hints)
    }

    fn logical_layout(&self, extended: PartitionLayout) -> Result<Vec<PartitionLayout>, io::Error> {
        let mut layouts = Vec::with_capacity(self.builder.logicals.len());
        let mut next_available_lba = extended.start_lba;

        for (idx, logical) in self.builder.logicals.iter().enumerate() {
            let builder = &logical.part.builder;

            let (Some(start_lba), Some(size_lba)) = (builder.offset_lba, builder.size_lba) else {
                return Err(invalid_input(format!(
                    "Logical partition {idx}: Missing offset or size"
                )));
            };

            if size_lba == 0 {
                return Err(invalid_input(format!(
                    "Logical partition {idx}: Empty partition"
                )));
            }

            if logical.ebr_lba < next_available_lba {
                return Err(invalid_input(format!(
                    "Logical partition {idx}: EBR overlaps with previous partition"
                )));
            }

            if start_lba <= logical.ebr_lba {
                return Err(invalid_input(format!(
                    "Logical partition {idx}: Partition starts before its EBR"
                )));
            }

            let layout = PartitionLayout {
                start_lba,
                end_lba: start_lba + size_lba - 1,
            };

            if !extended.contains(&layout) {
                return Err(invalid_input(format!(
                    "Logical partition {idx}: Partition overflows the extended partition"
                )));
            }

            debug!(
                "Logical partition {idx}: EBR at LBA {}, LBAs {} to {}",
                logical.ebr_lba, layout.start_lba, layout.end_lba
            );

            next_available_lba = layout.end_lba + 1;
            layouts.push(layout);
        }

        Ok(layouts)
    }

    fn build_ebr_chain(
        &self,
        extended: PartitionLayout,
        logicals: &[PartitionLayout],
    ) -> Result<Vec<Sector>, io::Error> {
        if logicals.is_empty() {
            debug!("Extended partition without logical partitions, writing an empty EBR");

            let mut ebr = [0u8; LBA_SIZE];
            Self::set_signature(&mut ebr);
            return Ok(vec![(extended.start_lba, ebr)]);
        }

        let mut sectors = Vec::with_capacity(logicals.len());
        for (idx, (logical, layout)) in zip(&self.builder.logicals, logicals).enumerate() {
            let mut ebr = [0u8; LBA_SIZE];

            let entry = Self::encode_entry(
                logical.part.builder.bits,
                logical.part.builder.type_,
                *layout,
                logical.ebr_lba,
            )?;
            Self::set_entry(&mut ebr, 0, &entry);

            if let (Some(next), Some(next_layout)) =
                (self.builder.logicals.get(idx + 1), logicals.get(idx + 1))
            {
                let link = PartitionLayout {
                    start_lba: next.ebr_lba,
                    end_lba: next_layout.end_lba,
                };

                let entry =
                    Self::encode_entry(0, EXTENDED_PARTITION_TYPE, link, extended.start_lba)?;
                Self::set_entry(&mut ebr, 1, &entry);
            }

            Self::set_signature(&mut ebr);
            sectors.push((logical.ebr_lba, ebr));
        }

        Ok(sectors)
    }

    fn build_sectors(&self, blocks: usize) -> Result<Vec<Sector>, io::Error> {
        if self.builder.partitions.len() > MBR_PRIMARY_ENTRIES {
            return Err(invalid_input(format!(
                "An MBR can only hold {MBR_PRIMARY_ENTRIES} primary or extended partitions"
            )));
        }

        let layouts = self.primary_layout(blocks)?;

        let extended = zip(&self.builder.partitions, &layouts)
            .filter(|(p, _)| is_extended_type(p.builder.type_))
            .map(|(_, l)| *l)
            .collect::<Vec<_>>();

        if extended.len() > 1 {
            return Err(invalid_input("Only one extended partition is allowed"));
        }

        let mut mbr = [0u8; LBA_SIZE];

        let disk_id = self.builder.disk_id.unwrap_or_else(rand::random::<u32>);
        debug!("Using Disk Identifier 0x{disk_id:x}");

        mbr[MBR_DISK_ID_OFFSET_BYTES..(MBR_DISK_ID_OFFSET_BYTES + 4)]
            .copy_from_slice(&disk_id.to_le_bytes());

        for (idx, (part, layout)) in zip(&self.builder.partitions, &layouts).enumerate() {
            let entry = Self::encode_entry(part.builder.bits, part.builder.type_, *layout, 0)?;
            Self::set_entry(&mut mbr, idx, &entry);
        }

        Self::set_signature(&mut mbr);

        let mut sectors = vec![(MBR_LBA_OFFSET, mbr)];

        if let Some(extended) = extended.first() {
            let logicals = self.logical_layout(*extended)?;
            sectors.extend(self.build_ebr_chain(*extended, &logicals)?);
        } else if !self.builder.logicals.is_empty() {
            return Err(invalid_input(
                "Logical partitions require an extended partition",
            ));
        }

        Ok(sectors)
    }

    /// Writes an MBR, and the EBRs of any logical partition, to a file or block device
    ///
    /// The whole table is computed and checked before the first byte is
    /// written, so an invalid table leaves the device untouched.
    ///
    /// # Errors
    ///
    /// This function will return an [`std::io::Error`] if there's an issue with the Partition Table
    /// layout, or when accessing the underlying [`File`].
    ///
    /// # Panics
    ///
    /// Panics if we have an integer overflow in one of the integer type conversions
    #[allow(clippy::unwrap_in_result)]
    pub fn write(self, file: &File) -> Result<(), io::Error> {
        let mut file = file;

        let len = file.seek(io::SeekFrom::End(0))?;
        let blocks = num_cast!(usize, len) / LBA_SIZE;
        debug!("Device has len of {len} bytes, {blocks} blocks");

        let sectors = self.build_sectors(blocks)?;

        for (lba, sector) in sectors {
            debug!("Writing table sector at LBA {lba}");

            file.seek(io::SeekFrom::Start(num_cast!(u64, lba * LBA_SIZE)))?;
            file.write_all(&sector)?;
        }

        file.flush()?;
        file.sync_data()?;

        Ok(())
    }
}

/// An MBR Partition Table Builder Structure
#[derive(Debug)]
pub struct MasterBootRecordPartitionTableBuilder {
    disk_id: Option<u32>,
    partitions: Vec<MasterBootRecordPartition>,
    logicals: Vec<LogicalPartition>,
}

impl MasterBootRecordPartitionTableBuilder {
    /// Creates a new MBR Partition Table Builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            disk_id: None,
            partitions: Vec::new(),
            logicals: Vec::new(),
        }
    }

    /// Sets the disk identifier. A random one is used otherwise.
    #[must_use]
    pub fn disk_id(mut self, id: u32) -> Self {
        self.disk_id = Some(id);
        self
    }

    /// Adds a primary or extended [`MasterBootRecordPartition`] to the Partition Table
    #[must_use]
    pub fn add_partition(mut self, part: MasterBootRecordPartition) -> Self {
        self.partitions.push(part);
        self
    }

    /// Adds a logical [`MasterBootRecordPartition`], described by an EBR located at `ebr_lba`.
    ///
    /// Logical partitions must be added in on-disk order.
    #[must_use]
    pub fn add_logical_partition(mut self, ebr_lba: usize, part: MasterBootRecordPartition) -> Self {
        self.logicals.push(LogicalPartition { ebr_lba, part });
        self
    }

    /// Creates a [`MasterBootRecordPartitionTable`] from our builder
    #[must_use]
    pub fn build(self) -> MasterBootRecordPartitionTable {
        MasterBootRecordPartitionTable { builder: self }
    }
}

impl Default for MasterBootRecordPartitionTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}
