use std::{ffi::CString, path::Path};

use ffmpeg_next::{
    Dictionary, Rational,
    codec::{Parameters, packet::Packet},
    format::format::Format,
    media,
};

use super::packet::RawPacket;
use crate::engine::VideoSource;

/// The captured video stream, detached from the format context borrow.
pub struct CaptureStream {
    pub index: usize,
    pub parameters: Parameters,
    pub time_base: Rational,
}

unsafe impl Send for CaptureStream {}

/// Capture device opened through a libavdevice input format.
pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    video: CaptureStream,
}

impl AvInput {
    /// Resolve input format by name (e.g. "x11grab", "gdigrab") via av_find_input_format.
    fn find_input_format(name: &str) -> anyhow::Result<ffmpeg_next::format::format::Input> {
        let cname = CString::new(name)
            .map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
        let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            anyhow::bail!("input format not found: {}", name);
        }
        Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
    }

    pub fn open(source: &VideoSource, fps: u32) -> anyhow::Result<Self> {
        let format = Self::find_input_format(&source.format)?;
        let mut options = Dictionary::new();
        options.set("framerate", &fps.to_string());
        for (key, value) in &source.options {
            options.set(key, value);
        }

        let input = ffmpeg_next::format::open_with(
            Path::new(&source.url),
            &Format::Input(format),
            options,
        )?
        .input();

        let video = input
            .streams()
            .best(media::Type::Video)
            .map(|stream| CaptureStream {
                index: stream.index(),
                parameters: stream.parameters(),
                time_base: stream.time_base(),
            })
            .ok_or_else(|| anyhow::anyhow!("{} has no video stream", source.url))?;
        log::info!(
            "capture input {}:{} opened, stream {} time_base {}",
            source.format,
            source.url,
            video.index,
            video.time_base
        );

        Ok(Self {
            inner: input,
            video,
        })
    }

    pub fn video_stream(&self) -> &CaptureStream {
        &self.video
    }

    /// Next video packet. `Ok(None)` when the device has nothing yet or the
    /// packet belongs to another stream.
    pub fn read_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        let mut packet = Packet::empty();
        match packet.read(&mut self.inner) {
            Ok(()) if packet.stream() == self.video.index => {
                Ok(Some((packet, self.video.time_base).into()))
            }
            Ok(()) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => anyhow::bail!("capture source ended"),
            Err(e) => Err(e.into()),
        }
    }
}
