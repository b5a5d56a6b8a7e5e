use ffmpeg_next::{Rational, codec::packet::Packet};

use super::ring::RingItem;

/// An encoded packet together with the time base its timestamps are in.
#[derive(Clone)]
pub struct RawPacket {
    packet: Packet,
    time_base: Rational,
}

impl RawPacket {
    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn dts(&self) -> Option<i64> {
        self.packet.dts()
    }

    pub fn size(&self) -> usize {
        self.packet.size()
    }

    pub fn is_key(&self) -> bool {
        self.packet.is_key()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    pub fn into_inner(self) -> Packet {
        self.packet
    }
}

impl From<(Packet, Rational)> for RawPacket {
    fn from((packet, time_base): (Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}

impl RingItem for RawPacket {
    fn size(&self) -> usize {
        self.size()
    }

    fn is_key(&self) -> bool {
        self.is_key()
    }

    fn seconds(&self) -> f64 {
        let ts = self.pts().or(self.dts()).unwrap_or(0);
        ts as f64 * f64::from(self.time_base)
    }
}
