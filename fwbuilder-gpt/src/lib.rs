#![doc = include_str!("../README.md")]

use std::{
    fs::File,
    io::{self, Seek as _, Write as _},
};

use bit_field::BitField as _;
use log::debug;
use mbr::{MasterBootRecordPartitionBuilder, MasterBootRecordPartitionTableBuilder};
use part::{build_layout, div_round_up, num_cast, PartitionLayout, PartitionLayoutHint, LBA_SIZE};
use uuid::{uuid, Uuid};

const MBR_HEADER_OFFSET_LBA: usize = 0;
const MBR_SIZE_LBA: usize = 1;
const PROTECTIVE_MBR_PARTITION_TYPE: u8 = 0xee;

const GPT_SIGNATURE_HEADER: u64 = 0x5452_4150_2049_4645;
const GPT_VERSION_HEADER: u32 = 0x0001_0000;
const GPT_HEADER_LEN: usize = 92;
const GPT_HEADER_SIZE_LBA: usize = 1;
const GPT_PARTITION_NUM: usize = 128;
const GPT_PARTITION_ENTRY_SIZE: usize = 128;
const GPT_PARTITION_NAME_OFFSET: usize = 56;
const GPT_PARTITION_NAME_MAX_LEN: usize = (GPT_PARTITION_ENTRY_SIZE - GPT_PARTITION_NAME_OFFSET) / 2;
const GPT_PARTITION_HEADER_SIZE_LBA: usize =
    (GPT_PARTITION_NUM * GPT_PARTITION_ENTRY_SIZE) / LBA_SIZE;

/// First LBA a partition can use on a GPT-labelled device
pub const FIRST_USABLE_LBA: usize =
    MBR_HEADER_OFFSET_LBA + MBR_SIZE_LBA + GPT_HEADER_SIZE_LBA + GPT_PARTITION_HEADER_SIZE_LBA;

/// Standard EFI System Partition GUID. See the
/// [UAPI discoverable partition specification][uapi spec], [Partition Type Section][uapi gpt types]
/// for further details.
///
/// [uapi spec]: https://uapi-group.org/specifications/specs/discoverable_partitions_specification/
/// [uapi gpt types]: https://uapi-group.org/specifications/specs/discoverable_partitions_specification/#defined-partition-type-uuids
pub const EFI_SYSTEM_PART_GUID: Uuid = uuid!("c12a7328-f81f-11d2-ba4b-00a0c93ec93b");

/// Generic Linux filesystem data partition GUID
pub const LINUX_FILESYSTEM_DATA_GUID: Uuid = uuid!("0fc63daf-8483-4772-8e79-3d69d8477de4");

/// Linux swap partition GUID
pub const LINUX_SWAP_GUID: Uuid = uuid!("0657fd6d-a4ab-43c4-84e5-0933c84b4f4f");

/// Microsoft Basic Data partition GUID, used for FAT filesystems
pub const MICROSOFT_BASIC_DATA_GUID: Uuid = uuid!("ebd0a0a2-b9e5-4433-87c0-68b6b72699c7");

/// Returns the last LBA a partition can use on a GPT-labelled device of `blocks` LBAs
#[must_use]
pub fn last_usable_lba(blocks: usize) -> Option<usize> {
    blocks.checked_sub(GPT_HEADER_SIZE_LBA + GPT_PARTITION_HEADER_SIZE_LBA + 1)
}

fn guid_bytes(uuid: &Uuid) -> [u8; 16] {
    let uuid_fields = uuid.as_fields();

    let mut uuid = [0; 16];
    uuid[0..4].copy_from_slice(&uuid_fields.0.to_le_bytes());
    uuid[4..6].copy_from_slice(&uuid_fields.1.to_le_bytes());
    uuid[6..8].copy_from_slice(&uuid_fields.2.to_le_bytes());
    uuid[8..].copy_from_slice(uuid_fields.3);

    uuid
}

struct GuidPartitionTableLayout {
    primary_gpt_header_lba: usize,
    primary_gpt_table_lba: usize,
    first_usable: usize,
    partitions_offset: Vec<PartitionLayout>,
    last_usable: usize,
    backup_gpt_table_lba: usize,
    backup_gpt_header_lba: usize,
}

/// GUID Partition Table Representation
#[derive(Debug)]
pub struct GuidPartitionTable {
    builder: GuidPartitionTableBuilder,
}

impl GuidPartitionTable {
    fn build_gpt_layout(&self, blocks: usize) -> Result<GuidPartitionTableLayout, io::Error> {
        let primary_gpt_lba = MBR_HEADER_OFFSET_LBA + MBR_SIZE_LBA;
        debug!("Primary GPT Header is located at LBA {primary_gpt_lba}");

        let primary_gpt_parts_lba = primary_gpt_lba + GPT_HEADER_SIZE_LBA;
        debug!("Primary GPT Partition table is located at LBA {primary_gpt_parts_lba}");

        let first_usable_lba = FIRST_USABLE_LBA;
        debug!("First Usable LBA: {first_usable_lba}");

        let last_usable_lba = last_usable_lba(blocks)
            .filter(|last| *last >= first_usable_lba)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "File is too small"))?;
        debug!("Last Usable LBA: {last_usable_lba}");

        let backup_gpt_parts_lba = last_usable_lba + 1;
        debug!("Backup GPT Partition table is located at LBA {backup_gpt_parts_lba}");

        let backup_gpt_lba = backup_gpt_parts_lba + GPT_PARTITION_HEADER_SIZE_LBA;
        debug!("Backup GPT Header is located at LBA {backup_gpt_lba}");

        let parts_hints = self
            .builder
            .partitions
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                Ok(PartitionLayoutHint {
                    offset_lba: p.builder.offset_lba,
                    size_lba: p.builder.size_lba.ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("Partition {idx}: Missing size"),
                        )
                    })?,
                })
            })
            .collect::<Result<Vec<_>, io::Error>>()?;

        Ok(GuidPartitionTableLayout {
            primary_gpt_header_lba: primary_gpt_lba,
            primary_gpt_table_lba: primary_gpt_parts_lba,
            first_usable: first_usable_lba,
            partitions_offset: build_layout(first_usable_lba, last_usable_lba, 1, &parts_hints)?,
            last_usable: last_usable_lba,
            backup_gpt_table_lba: backup_gpt_parts_lba,
            backup_gpt_header_lba: backup_gpt_lba,
        })
    }

    #[allow(clippy::unwrap_in_result)]
    fn build_entries(&self, cfg: &GuidPartitionTableLayout) -> Result<Vec<u8>, io::Error> {
        if self.builder.partitions.len() > GPT_PARTITION_NUM {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("A GPT can only hold {GPT_PARTITION_NUM} partitions"),
            ));
        }

        let mut parts: Vec<u8> = Vec::with_capacity(GPT_PARTITION_NUM * GPT_PARTITION_ENTRY_SIZE);
        for (part, layout) in Iterator::zip(self.builder.partitions.iter(), cfg.partitions_offset.iter())
        {
            let mut entry = [0u8; GPT_PARTITION_ENTRY_SIZE];

            entry[0..16].copy_from_slice(&guid_bytes(&part.builder.type_));
            entry[16..32].copy_from_slice(&guid_bytes(&part.builder.guid));
            entry[32..40].copy_from_slice(&num_cast!(u64, layout.start_lba).to_le_bytes());
            entry[40..48].copy_from_slice(&num_cast!(u64, layout.end_lba).to_le_bytes());
            entry[48..56].copy_from_slice(&part.builder.bits.to_le_bytes());

            if let Some(name) = &part.builder.name {
                let name = name.encode_utf16().collect::<Vec<_>>();
                if name.len() > GPT_PARTITION_NAME_MAX_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("Partition name is longer than {GPT_PARTITION_NAME_MAX_LEN} characters"),
                    ));
                }

                for (idx, ch) in name.iter().enumerate() {
                    let start = GPT_PARTITION_NAME_OFFSET + idx * 2;
                    entry[start..(start + 2)].copy_from_slice(&ch.to_le_bytes());
                }
            }

            parts.extend_from_slice(&entry);
        }

        parts.resize(GPT_PARTITION_NUM * GPT_PARTITION_ENTRY_SIZE, 0);

        Ok(parts)
    }

    fn build_header(&self, cfg: &GuidPartitionTableLayout, parts: &[u8], backup: bool) -> [u8; LBA_SIZE] {
        let (my_lba, alternate_lba, table_lba) = if backup {
            (cfg.backup_gpt_header_lba, cfg.primary_gpt_header_lba, cfg.backup_gpt_table_lba)
        } else {
            (cfg.primary_gpt_header_lba, cfg.backup_gpt_header_lba, cfg.primary_gpt_table_lba)
        };

        let mut header = [0u8; GPT_HEADER_LEN];
        header[0..8].copy_from_slice(&GPT_SIGNATURE_HEADER.to_le_bytes());
        header[8..12].copy_from_slice(&GPT_VERSION_HEADER.to_le_bytes());
        header[12..16].copy_from_slice(&num_cast!(u32, GPT_HEADER_LEN).to_le_bytes());
        header[24..32].copy_from_slice(&num_cast!(u64, my_lba).to_le_bytes());
        header[32..40].copy_from_slice(&num_cast!(u64, alternate_lba).to_le_bytes());
        header[40..48].copy_from_slice(&num_cast!(u64, cfg.first_usable).to_le_bytes());
        header[48..56].copy_from_slice(&num_cast!(u64, cfg.last_usable).to_le_bytes());
        header[56..72].copy_from_slice(&guid_bytes(&self.builder.guid));
        header[72..80].copy_from_slice(&num_cast!(u64, table_lba).to_le_bytes());
        header[80..84].copy_from_slice(&num_cast!(u32, GPT_PARTITION_NUM).to_le_bytes());
        header[84..88].copy_from_slice(&num_cast!(u32, GPT_PARTITION_ENTRY_SIZE).to_le_bytes());
        header[88..92].copy_from_slice(&crc32fast::hash(parts).to_le_bytes());

        let header_crc = crc32fast::hash(&header);
        header[16..20].copy_from_slice(&header_crc.to_le_bytes());

        let mut sector = [0u8; LBA_SIZE];
        sector[..GPT_HEADER_LEN].copy_from_slice(&header);
        sector
    }

    /// Writes a GPT, along with its protective MBR, to a file or block device
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

        let cfg = self.build_gpt_layout(blocks)?;
        let parts = self.build_entries(&cfg)?;
        let primary_gpt = self.build_header(&cfg, &parts, false);
        let backup_gpt = self.build_header(&cfg, &parts, true);

        let protective_size = (blocks - MBR_SIZE_LBA).min(num_cast!(usize, u32::MAX));
        MasterBootRecordPartitionTableBuilder::new()
            .add_partition(
                MasterBootRecordPartitionBuilder::new(PROTECTIVE_MBR_PARTITION_TYPE)
                    .offset(cfg.primary_gpt_header_lba)
                    .size_lba(protective_size)
                    .build(),
            )
            .build()
            .write(file)?;

        for (lba, data) in [
            (cfg.primary_gpt_header_lba, &primary_gpt[..]),
            (cfg.primary_gpt_table_lba, &parts[..]),
            (cfg.backup_gpt_table_lba, &parts[..]),
            (cfg.backup_gpt_header_lba, &backup_gpt[..]),
        ] {
            file.seek(io::SeekFrom::Start(num_cast!(u64, lba * LBA_SIZE)))?;
            file.write_all(data)?;
        }

        file.flush()?;
        file.sync_data()?;

        Ok(())
    }
}

/// A GUID Partition Table Builder Structure
#[derive(Debug)]
pub struct GuidPartitionTableBuilder {
    guid: Uuid,
    partitions: Vec<GuidPartition>,
}

impl GuidPartitionTableBuilder {
    /// Creates a new GUID Partition Table Builder with the specified [`uuid::Uuid`]
    #[must_use]
    pub fn new_with_uuid(guid: Uuid) -> Self {
        Self {
            guid,
            partitions: Vec::new(),
        }
    }

    /// Create a new GUID Partition Table Builder with a random [`uuid::Uuid`] according to the UUID
    /// v4 specification
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_uuid(Uuid::new_v4())
    }

    /// Adds a [`GuidPartition`] to the Partition Table
    #[must_use]
    pub fn add_partition(mut self, part: GuidPartition) -> Self {
        self.partitions.push(part);
        self
    }

    /// Creates a [`GuidPartitionTable`] from our builder
    #[must_use]
    pub fn build(self) -> GuidPartitionTable {
        GuidPartitionTable { builder: self }
    }
}

impl Default for GuidPartitionTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A GUID Partition
#[derive(Debug)]
pub struct GuidPartition {
    builder: GuidPartitionBuilder,
}

/// A GUID Partition Builder Structure
#[derive(Debug)]
pub struct GuidPartitionBuilder {
    type_: Uuid,
    guid: Uuid,
    name: Option<String>,
    offset_lba: Option<usize>,
    size_lba: Option<usize>,
    bits: u64,
}

impl GuidPartitionBuilder {
    /// Creates a new GUID Partition Builder of a specified [`uuid::Uuid`] type and [`uuid::Uuid`]
    /// GUID
    #[must_use]
    pub fn new_with_uuid(part_type: Uuid, part_guid: Uuid) -> Self {
        Self {
            type_: part_type,
            guid: part_guid,
            name: None,
            offset_lba: None,
            size_lba: None,
            bits: 0,
        }
    }

    /// Creates a new GUID Partition Builder of a specified [`uuid::Uuid`] type and a random GUID
    /// according to the UUID v4 specification
    #[must_use]
    pub fn new(part_type: Uuid) -> Self {
        Self::new_with_uuid(part_type, Uuid::new_v4())
    }

    /// Sets the partition offset in LBAs from the start of the device.
    ///
    /// If the offset isn't provided, the partition starts right after the
    /// previous one.
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

    /// Sets the partition name. It can't be longer than 36 UTF-16 code units.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    /// Marks the partition as required for the platform to function. See Table 5.8 of the
    /// [UEFI Specification] for further explanations.
    ///
    /// [UEFI Specification]: https://uefi.org/sites/default/files/resources/UEFI_Spec_2_10_Aug29.pdf
    #[must_use]
    pub fn platform_required(mut self, val: bool) -> Self {
        self.bits.set_bit(0, val);
        self
    }

    /// Marks the partition as bootable for Legacy BIOS implementations.
    #[must_use]
    pub fn bootable(mut self, val: bool) -> Self {
        self.bits.set_bit(2, val);
        self
    }

    /// Creates a [`GuidPartition`] from our builder
    #[must_use]
    pub fn build(self) -> GuidPartition {
        GuidPartition { builder: self }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs::File,
        io::{Read as _, Seek as _, SeekFrom},
    };

    use part::{num_cast, LBA_SIZE};
    use tempfile::NamedTempFile;
    use test_log::test;
    use uuid::Uuid;

    use crate::{
        guid_bytes, last_usable_lba, GuidPartitionBuilder, GuidPartitionTableBuilder,
        EFI_SYSTEM_PART_GUID, FIRST_USABLE_LBA, LINUX_FILESYSTEM_DATA_GUID,
    };

    const TEMP_FILE_SIZE: usize = 64 << 20;
    const TEMP_FILE_BLOCKS: usize = TEMP_FILE_SIZE / LBA_SIZE;

    fn temp_disk() -> NamedTempFile {
        let temp_file = NamedTempFile::new().unwrap();
        temp_file
            .as_file()
            .set_len(num_cast!(u64, TEMP_FILE_SIZE))
            .unwrap();
        temp_file
    }

    fn read_at(file: &File, offset: usize, len: usize) -> Vec<u8> {
        let mut file = file;
        let mut buf = vec![0u8; len];

        file.seek(SeekFrom::Start(num_cast!(u64, offset))).unwrap();
        file.read_exact(&mut buf).unwrap();
        buf
    }

    fn read_u64(buf: &[u8], offset: usize) -> u64 {
        u64::from_le_bytes(buf[offset..(offset + 8)].try_into().unwrap())
    }

    fn read_u32(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(buf[offset..(offset + 4)].try_into().unwrap())
    }

    #[test]
    fn test_usable_area() {
        assert_eq!(FIRST_USABLE_LBA, 34);
        assert_eq!(last_usable_lba(TEMP_FILE_BLOCKS), Some(TEMP_FILE_BLOCKS - 34));
        assert_eq!(last_usable_lba(10), None);
    }

    #[test]
    fn test_table_no_partition() {
        let temp_file = temp_disk();

        let uuid = Uuid::new_v4();
        GuidPartitionTableBuilder::new_with_uuid(uuid)
            .build()
            .write(temp_file.as_file())
            .unwrap();

        let mbr = read_at(temp_file.as_file(), 0, LBA_SIZE);
        assert_eq!(mbr[446 + 4], 0xee);
        assert_eq!(read_u32(&mbr, 446 + 8), 1);
        assert_eq!(&mbr[510..], &[0x55, 0xaa]);

        let header = read_at(temp_file.as_file(), LBA_SIZE, LBA_SIZE);
        assert_eq!(&header[0..8], b"EFI PART");
        assert_eq!(read_u64(&header, 24), 1);
        assert_eq!(read_u64(&header, 32), num_cast!(u64, TEMP_FILE_BLOCKS - 1));
        assert_eq!(read_u64(&header, 40), 34);
        assert_eq!(read_u64(&header, 48), num_cast!(u64, TEMP_FILE_BLOCKS - 34));
        assert_eq!(&header[56..72], &guid_bytes(&uuid));
        assert_eq!(read_u64(&header, 72), 2);
    }

    #[test]
    fn test_header_checksums() {
        let temp_file = temp_disk();

        GuidPartitionTableBuilder::new()
            .add_partition(
                GuidPartitionBuilder::new(LINUX_FILESYSTEM_DATA_GUID)
                    .offset(2048)
                    .size_lba(2048)
                    .build(),
            )
            .build()
            .write(temp_file.as_file())
            .unwrap();

        for header_lba in [1, TEMP_FILE_BLOCKS - 1] {
            let mut header = read_at(temp_file.as_file(), header_lba * LBA_SIZE, 92);
            let expected_crc = read_u32(&header, 16);
            header[16..20].copy_from_slice(&[0; 4]);
            assert_eq!(crc32fast::hash(&header), expected_crc);

            let table_lba = num_cast!(usize, read_u64(&header, 72));
            let entries = read_at(temp_file.as_file(), table_lba * LBA_SIZE, 128 * 128);
            assert_eq!(crc32fast::hash(&entries), read_u32(&header, 88));
        }
    }

    #[test]
    fn test_partition_entries() {
        let temp_file = temp_disk();

        let guid = Uuid::new_v4();
        GuidPartitionTableBuilder::new()
            .add_partition(
                GuidPartitionBuilder::new(EFI_SYSTEM_PART_GUID)
                    .offset(2048)
                    .size(60 << 20)
                    .name("boot")
                    .bootable(true)
                    .build(),
            )
            .add_partition(
                GuidPartitionBuilder::new_with_uuid(LINUX_FILESYSTEM_DATA_GUID, guid)
                    .size_lba(1000)
                    .build(),
            )
            .build()
            .write(temp_file.as_file())
            .unwrap();

        let entries = read_at(temp_file.as_file(), 2 * LBA_SIZE, 2 * 128);

        let first = &entries[0..128];
        assert_eq!(&first[0..16], &guid_bytes(&EFI_SYSTEM_PART_GUID));
        assert_eq!(read_u64(first, 32), 2048);
        assert_eq!(read_u64(first, 40), 2048 + 122_880 - 1);
        assert_eq!(read_u64(first, 48), 1 << 2);
        assert_eq!(&first[56..64], &[b'b', 0, b'o', 0, b'o', 0, b't', 0]);

        let second = &entries[128..256];
        assert_eq!(&second[16..32], &guid_bytes(&guid));
        assert_eq!(read_u64(second, 32), 2048 + 122_880);
        assert_eq!(read_u64(second, 40), 2048 + 122_880 + 1000 - 1);
    }

    #[test]
    fn test_file_too_small() {
        let temp_file = NamedTempFile::new().unwrap();
        temp_file
            .as_file()
            .set_len(num_cast!(u64, 40 * LBA_SIZE))
            .unwrap();

        GuidPartitionTableBuilder::new()
            .build()
            .write(temp_file.as_file())
            .unwrap_err();
    }

    #[test]
    fn test_partition_overflow() {
        let temp_file = temp_disk();

        GuidPartitionTableBuilder::new()
            .add_partition(
                GuidPartitionBuilder::new(LINUX_FILESYSTEM_DATA_GUID)
                    .offset(2048)
                    .size(TEMP_FILE_SIZE)
                    .build(),
            )
            .build()
            .write(temp_file.as_file())
            .unwrap_err();

        assert_eq!(read_at(temp_file.as_file(), 0, LBA_SIZE), vec![0u8; LBA_SIZE]);
    }

    #[test]
    fn test_name_too_long() {
        let temp_file = temp_disk();

        GuidPartitionTableBuilder::new()
            .add_partition(
                GuidPartitionBuilder::new(LINUX_FILESYSTEM_DATA_GUID)
                    .size_lba(2048)
                    .name(&"a".repeat(37))
                    .build(),
            )
            .build()
            .write(temp_file.as_file())
            .unwrap_err();
    }

    #[test]
    fn test_missing_size() {
        let temp_file = temp_disk();

        GuidPartitionTableBuilder::new()
            .add_partition(GuidPartitionBuilder::new(LINUX_FILESYSTEM_DATA_GUID).build())
            .build()
            .write(temp_file.as_file())
            .unwrap_err();
    }
}
