use std::path::Path;

use anyhow::Context;
use ffmpeg_next::{Rational, codec::Parameters};

use super::packet::RawPacket;

/// Everything needed to write a clip, detached from the capture thread.
pub struct ClipSnapshot {
    pub parameters: Parameters,
    pub packets: Vec<RawPacket>,
}

unsafe impl Send for ClipSnapshot {}

/// Muxes the snapshot into a single-stream file. Timestamps are rebased so
/// the clip starts at zero.
pub fn write_clip(path: &Path, snapshot: ClipSnapshot) -> anyhow::Result<()> {
    let first = snapshot
        .packets
        .first()
        .context("replay buffer is empty")?;
    let base = first.dts().or(first.pts()).unwrap_or(0);

    let mut output = ffmpeg_next::format::output(&path)
        .with_context(|| format!("create {}", path.display()))?;
    {
        let mut stream = output.add_stream(ffmpeg_next::encoder::find(snapshot.parameters.id()))?;
        stream.set_parameters(snapshot.parameters.clone());
        unsafe {
            (*stream.parameters().as_mut_ptr()).codec_tag = 0;
        }
    }
    output.write_header()?;

    let out_time_base: Rational = output
        .stream(0)
        .map(|s| s.time_base())
        .context("output stream missing")?;

    let count = snapshot.packets.len();
    for raw in snapshot.packets {
        let time_base = raw.time_base();
        let mut packet = raw.into_inner();
        packet.set_pts(packet.pts().map(|ts| ts - base));
        packet.set_dts(packet.dts().map(|ts| ts - base));
        packet.set_stream(0);
        packet.set_position(-1);
        packet.rescale_ts(time_base, out_time_base);
        packet.write_interleaved(&mut output)?;
    }
    output.write_trailer()?;

    log::debug!("wrote {} packets to {}", count, path.display());
    Ok(())
}
