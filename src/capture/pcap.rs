//! Capture file reader built on `pcap-file`
//!
//! Reads classic libpcap and pcapng files and collects the source address of
//! every Ethernet frame. A well-formed capture of another link type (Linux
//! cooked, raw IP, 802.11 radiotap...) yields no addresses and is treated as
//! an empty capture.

use super::{timestamp_from_file_name, Capture, CaptureError, CaptureSource};
use pcap_file::pcap::PcapReader;
use pcap_file::pcapng::{Block, PcapNgReader};
use pcap_file::DataLink;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

/// Reads `.pcap` / `.pcapng` files written by tcpdump/dumpcap
#[derive(Debug, Clone, Default)]
pub struct PcapCaptureSource;

impl PcapCaptureSource {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureSource for PcapCaptureSource {
    fn read(&self, path: &Path) -> Result<Capture, CaptureError> {
        let timestamp = timestamp_from_file_name(path)?;
        let file = File::open(path)?;
        let (addresses, packet_count) = read_source_addresses(file)?;

        Ok(Capture {
            timestamp,
            addresses,
            packet_count,
        })
    }
}

/// Distinct source addresses and frame count accumulated over one capture
#[derive(Debug, Default)]
struct FrameCollector {
    addresses: BTreeSet<String>,
    packets: usize,
    non_ethernet: usize,
}

impl FrameCollector {
    fn push(&mut self, ethernet: bool, frame: &[u8]) {
        self.packets += 1;
        if !ethernet {
            self.non_ethernet += 1;
            return;
        }
        // dst(6) src(6) ethertype(2)
        if frame.len() >= 14 {
            self.addresses.insert(format_address(&frame[6..12]));
        }
    }

    fn finish(self) -> (BTreeSet<String>, usize) {
        if self.non_ethernet > 0 {
            log::debug!(
                "{} of {} frames are not Ethernet, ignored",
                self.non_ethernet,
                self.packets
            );
        }
        (self.addresses, self.packets)
    }
}

/// Distinct Ethernet source addresses and the number of frames read
///
/// The format is picked from the leading magic: pcapng section header or
/// classic pcap (either byte order, micro or nanosecond).
pub fn read_source_addresses<R: Read>(
    reader: R,
) -> Result<(BTreeSet<String>, usize), CaptureError> {
    let mut reader = BufReader::new(reader);
    let head = reader.fill_buf()?;
    let is_pcapng = head.len() >= 4 && head[..4] == PCAPNG_MAGIC;

    if is_pcapng {
        read_pcapng(reader)
    } else {
        read_pcap(reader)
    }
}

fn read_pcap<R: Read>(reader: R) -> Result<(BTreeSet<String>, usize), CaptureError> {
    let mut pcap = PcapReader::new(reader)?;
    let ethernet = pcap.header().datalink == DataLink::ETHERNET;
    let mut frames = FrameCollector::default();

    while let Some(packet) = pcap.next_packet() {
        let packet = packet?;
        frames.push(ethernet, &packet.data);
    }

    Ok(frames.finish())
}

fn read_pcapng<R: Read>(reader: R) -> Result<(BTreeSet<String>, usize), CaptureError> {
    let mut pcapng = PcapNgReader::new(reader)?;
    // Link type per interface id of the current section
    let mut link_types: Vec<DataLink> = Vec::new();
    let mut frames = FrameCollector::default();

    while let Some(block) = pcapng.next_block() {
        match block? {
            Block::SectionHeader(_) => link_types.clear(),
            Block::InterfaceDescription(idb) => link_types.push(idb.linktype),
            Block::EnhancedPacket(epb) => {
                let ethernet =
                    link_types.get(epb.interface_id as usize) == Some(&DataLink::ETHERNET);
                frames.push(ethernet, &epb.data);
            }
            Block::SimplePacket(spb) => {
                let ethernet = link_types.first() == Some(&DataLink::ETHERNET);
                frames.push(ethernet, &spb.data);
            }
            _ => {}
        }
    }

    Ok(frames.finish())
}

/// `aa:bb:cc:dd:ee:ff`
pub fn format_address(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
fn arp_frame(src: &[u8; 6]) -> Vec<u8> {
    let mut frame = vec![0xff; 6];
    frame.extend_from_slice(src);
    frame.extend_from_slice(&[0x08, 0x06]); // ARP
    frame.extend_from_slice(&[0u8; 28]);
    frame
}

/// Test helper: little-endian microsecond pcap of the given link type
#[cfg(test)]
pub(crate) fn build_pcap_with_link(link_type: u32, sources: &[[u8; 6]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&link_type.to_le_bytes());

    for (i, src) in sources.iter().enumerate() {
        let frame = arp_frame(src);
        out.extend_from_slice(&(1_689_933_600u32 + i as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&frame);
    }
    out
}

/// Test helper: Ethernet pcap with the given source addresses
#[cfg(test)]
pub(crate) fn build_pcap(sources: &[[u8; 6]]) -> Vec<u8> {
    build_pcap_with_link(1, sources)
}
