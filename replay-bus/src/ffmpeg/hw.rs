//! Hardware encoder detection by codec name.

use ffmpeg_next::format::Pixel;

const HARDWARE_SUFFIXES: &[&str] = &["_nvenc", "_qsv", "_amf", "_vaapi", "_videotoolbox"];

pub fn is_hardware_encoder(codec: &str) -> bool {
    HARDWARE_SUFFIXES.iter().any(|s| codec.ends_with(s))
}

/// Hardware encoders take NV12 input, software encoders planar YUV 4:2:0.
pub fn pixel_format_for(codec: &str) -> Pixel {
    if is_hardware_encoder(codec) {
        Pixel::NV12
    } else {
        Pixel::YUV420P
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_by_backend() {
        assert_eq!(pixel_format_for("h264_nvenc"), Pixel::NV12);
        assert_eq!(pixel_format_for("h264_qsv"), Pixel::NV12);
        assert_eq!(pixel_format_for("h264_amf"), Pixel::NV12);
        assert_eq!(pixel_format_for("libx264"), Pixel::YUV420P);
        assert!(!is_hardware_encoder("aac"));
    }
}
