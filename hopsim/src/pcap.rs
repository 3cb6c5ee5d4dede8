//! Per-node PCAP export of link-layer traffic.
//!
//! One file per node, `<NodeName>_<NodeID>_<yyyyMMdd_HHmmss>.pcap`, using
//! DLT_BLUETOOTH_LE_LL_WITH_PHDR (256). Each record carries the synthetic
//! PHY header (channel, powers, reference access address, flags, and a
//! coding indicator on coded PHYs) followed by the frame bytes.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use hoplink::{PhyMode, Timestamp};

/// Link-layer type for BLE LL frames with the PHY pseudo-header.
pub const DLT_BLUETOOTH_LE_LL_WITH_PHDR: u32 = 256;

// Flag bits of the 16-bit pseudo-header flags field.
const FLAG_DEWHITENED: u16 = 0x0001;
const FLAG_SIGNAL_POWER_VALID: u16 = 0x0002;
const FLAG_NOISE_POWER_VALID: u16 = 0x0004;
const FLAG_REF_AA_VALID: u16 = 0x0010;
const FLAG_CRC_CHECKED: u16 = 0x0400;
const FLAG_CRC_VALID: u16 = 0x0800;

// 3-bit direction field at bits 7-9.
const DIRECTION_SHIFT: u16 = 7;

// 2-bit PHY field at bits 14-15.
const PHY_1M: u16 = 0x0000;
const PHY_2M: u16 = 0x4000;
const PHY_CODED: u16 = 0x8000;

/// Frame direction recorded in the flags field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    CentralToPeripheral,
    PeripheralToCentral,
    Observer,
}

impl Direction {
    fn field_value(self) -> u16 {
        match self {
            Direction::CentralToPeripheral => 0b010,
            Direction::PeripheralToCentral => 0b011,
            Direction::Observer => 0b110,
        }
    }
}

/// PHY field and optional coding indicator for a record.
fn phy_flags(phy: PhyMode) -> (u16, Option<u8>) {
    match phy {
        PhyMode::Le1M => (PHY_1M, None),
        PhyMode::Le2M => (PHY_2M, None),
        PhyMode::Le500K => (PHY_CODED, Some(1)),
        PhyMode::Le125K => (PHY_CODED, Some(0)),
    }
}

/// Build the `<NodeName>_<NodeID>_<yyyyMMdd_HHmmss>.pcap` file name from a
/// wall-clock UNIX timestamp (file naming only; simulation time never
/// touches the wall clock).
pub fn pcap_filename(node_name: &str, node_id: u32, unix_secs: u64) -> String {
    let (y, m, d, hh, mm, ss) = civil_from_unix(unix_secs);
    format!("{node_name}_{node_id}_{y:04}{m:02}{d:02}_{hh:02}{mm:02}{ss:02}.pcap")
}

/// Gregorian date and time-of-day from a UNIX timestamp.
fn civil_from_unix(unix_secs: u64) -> (u64, u64, u64, u64, u64, u64) {
    let days = unix_secs / 86_400;
    let secs_of_day = unix_secs % 86_400;

    // Civil-from-days, shifted so the era starts on 0000-03-01.
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z % 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    (y, m, d, secs_of_day / 3_600, (secs_of_day / 60) % 60, secs_of_day % 60)
}

/// PCAP file writer for one node.
pub struct PcapWriter<W: Write> {
    writer: W,
}

impl<W: Write> PcapWriter<W> {
    /// Create a writer and emit the global header.
    pub fn new(mut writer: W) -> io::Result<Self> {
        writer.write_u32::<LittleEndian>(0xa1b2_c3d4)?; // magic
        writer.write_u16::<LittleEndian>(2)?; // version_major
        writer.write_u16::<LittleEndian>(4)?; // version_minor
        writer.write_i32::<LittleEndian>(0)?; // thiszone
        writer.write_u32::<LittleEndian>(0)?; // sigfigs
        writer.write_u32::<LittleEndian>(10 + 1 + 4 + 2 + 255 + 3)?; // snaplen
        writer.write_u32::<LittleEndian>(DLT_BLUETOOTH_LE_LL_WITH_PHDR)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    /// Write one frame record.
    ///
    /// `frame` is the on-air bytes starting with the access address; the
    /// coding indicator is spliced between the access address and the PDU
    /// for coded PHYs.
    #[allow(clippy::too_many_arguments)]
    pub fn write_frame(
        &mut self,
        at: Timestamp,
        channel: u8,
        rssi_dbm: i8,
        noise_dbm: i8,
        access_address: u32,
        phy: PhyMode,
        direction: Direction,
        crc_ok: bool,
        frame: &[u8],
    ) -> io::Result<()> {
        let (phy_bits, coding_indicator) = phy_flags(phy);
        let mut flags = FLAG_DEWHITENED
            | FLAG_SIGNAL_POWER_VALID
            | FLAG_NOISE_POWER_VALID
            | FLAG_REF_AA_VALID
            | FLAG_CRC_CHECKED
            | (direction.field_value() << DIRECTION_SHIFT)
            | phy_bits;
        if crc_ok {
            flags |= FLAG_CRC_VALID;
        }

        let header_len = 10 + coding_indicator.map_or(0, |_| 1);
        let body_len = frame.len() + coding_indicator.map_or(0, |_| 1);
        let total_len = header_len + body_len;

        // Record header
        self.writer.write_u32::<LittleEndian>(at.as_secs() as u32)?;
        self.writer
            .write_u32::<LittleEndian>((at.as_micros() % 1_000_000) as u32)?;
        self.writer.write_u32::<LittleEndian>(total_len as u32)?;
        self.writer.write_u32::<LittleEndian>(total_len as u32)?;

        // PHY pseudo-header
        self.writer.write_u8(channel)?;
        self.writer.write_i8(rssi_dbm)?;
        self.writer.write_i8(noise_dbm)?;
        self.writer.write_u8(0)?; // aa_offenses
        self.writer.write_u32::<LittleEndian>(access_address)?;
        self.writer.write_u16::<LittleEndian>(flags)?;
        if let Some(ci) = coding_indicator {
            self.writer.write_u8(ci)?;
        }

        // Body: access address, optional coding indicator, PDU bytes.
        self.writer.write_all(&frame[..4])?;
        if let Some(ci) = coding_indicator {
            self.writer.write_u8(ci)?;
        }
        self.writer.write_all(&frame[4..])?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_header() {
        let mut buf = Vec::new();
        PcapWriter::new(&mut buf).unwrap();
        assert_eq!(buf.len(), 24);
        assert_eq!(buf[0..4], [0xd4, 0xc3, 0xb2, 0xa1]);
        // DLT 256
        assert_eq!(buf[20..24], [0, 1, 0, 0]);
    }

    #[test]
    fn test_record_layout_uncoded() {
        let mut buf = Vec::new();
        let mut w = PcapWriter::new(&mut buf).unwrap();
        let frame = [0xF2, 0x47, 0x76, 0x48, 0x02, 0x00, 0xAA, 0xBB, 0xCC];
        w.write_frame(
            Timestamp::from_micros(1_500_042),
            17,
            -40,
            -95,
            0x487647F2,
            PhyMode::Le1M,
            Direction::CentralToPeripheral,
            true,
            &frame,
        )
        .unwrap();

        let rec = &buf[24..];
        // ts_sec = 1, ts_usec = 500042
        assert_eq!(rec[0..4], 1u32.to_le_bytes());
        assert_eq!(rec[4..8], 500_042u32.to_le_bytes());
        // lengths: 10-byte header + 9-byte frame
        assert_eq!(rec[8..12], 19u32.to_le_bytes());
        // channel
        assert_eq!(rec[16], 17);
        // reference access address
        assert_eq!(rec[20..24], 0x487647F2u32.to_le_bytes());
        // flags: dewhitened|sig|noise|refaa|checked|valid|dir(010<<7)
        let flags = u16::from_le_bytes([rec[24], rec[25]]);
        assert_eq!(flags, 0x0001 | 0x0002 | 0x0004 | 0x0010 | 0x0400 | 0x0800 | (0b010 << 7));
        // body equals the frame
        assert_eq!(&rec[26..], &frame);
    }

    #[test]
    fn test_coded_phy_carries_coding_indicator() {
        let mut buf = Vec::new();
        let mut w = PcapWriter::new(&mut buf).unwrap();
        let frame = [0xF2, 0x47, 0x76, 0x48, 0x01, 0x00, 0x00, 0x00, 0x00];
        w.write_frame(
            Timestamp::ZERO,
            0,
            -40,
            -95,
            0x487647F2,
            PhyMode::Le500K,
            Direction::PeripheralToCentral,
            false,
            &frame,
        )
        .unwrap();

        let rec = &buf[24..];
        // 11-byte header + 10-byte body
        assert_eq!(rec[8..12], 21u32.to_le_bytes());
        let flags = u16::from_le_bytes([rec[24], rec[25]]);
        // Coded PHY bits set, CRC checked but not valid.
        assert_eq!(flags & 0xC000, 0x8000);
        assert_eq!(flags & 0x0400, 0x0400);
        assert_eq!(flags & 0x0800, 0);
        // Coding indicator 1 (LE 500K) in the header and again in the body.
        assert_eq!(rec[26], 1);
        assert_eq!(rec[27..31], frame[..4]);
        assert_eq!(rec[31], 1);
    }

    #[test]
    fn test_filename_format() {
        // 2026-08-02 00:00:00 UTC
        let name = pcap_filename("Laptop", 1, 1_785_628_800);
        assert_eq!(name, "Laptop_1_20260802_000000.pcap");
    }

    #[test]
    fn test_civil_from_unix_epoch() {
        assert_eq!(civil_from_unix(0), (1970, 1, 1, 0, 0, 0));
        // 2000-03-01 12:34:56 UTC
        assert_eq!(civil_from_unix(951_827_696), (2000, 3, 1, 12, 34, 56));
    }
}
