use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

pub fn read_u8(src: &[u8], offset: usize) -> Option<u8> {
    src.get(offset).copied()
}

pub fn read_u16(src: &[u8], offset: usize) -> Option<u16> {
    let bytes = src.get(offset..offset + 2)?;
    let mut u16_bytes = [0u8; 2];
    u16_bytes.copy_from_slice(bytes);
    Some(u16::from_be_bytes(u16_bytes))
}

pub fn read_u32(src: &[u8], offset: usize) -> Option<u32> {
    let bytes = src.get(offset..offset + 4)?;
    let mut u32_bytes = [0u8; 4];
    u32_bytes.copy_from_slice(bytes);
    Some(u32::from_be_bytes(u32_bytes))
}

pub fn read_u64(src: &[u8], offset: usize) -> Option<u64> {
    let bytes = src.get(offset..offset + 8)?;
    let mut u64_bytes = [0u8; 8];
    u64_bytes.copy_from_slice(bytes);
    Some(u64::from_be_bytes(u64_bytes))
}

pub fn init_logger(level: tracing::Level) {
    let format = tracing_subscriber::fmt::format()
        .with_timer(LocalTime::rfc_3339())
        .pretty();
    tracing_subscriber::FmtSubscriber::builder()
        .event_format(format)
        .with_max_level(level)
        .init();
}

pub fn init_logger_with_filter(filter: impl Into<EnvFilter>) {
    let format = tracing_subscriber::fmt::format()
        .with_timer(LocalTime::rfc_3339())
        .pretty()
        .with_file(false);
    tracing_subscriber::FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .init();
}

#[cfg(test)]
mod tests {
    use crate::ext::{read_u16, read_u32, read_u64};

    #[test]
    fn test_read_out_of_bounds() {
        let buf = [0x12u8, 0x34, 0x56];
        assert_eq!(read_u16(&buf, 0), Some(0x1234));
        assert_eq!(read_u16(&buf, 2), None);
        assert_eq!(read_u32(&buf, 0), None);
        assert_eq!(read_u64(&buf, 0), None);
    }
}
