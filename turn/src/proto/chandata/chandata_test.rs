use super::*;

#[test]
fn test_channel_data_round_trip() -> Result<()> {
    let cd = ChannelData::new(0x4001, vec![1, 2, 3, 4, 5]);
    let raw = cd.encode();
    assert_eq!(&raw[..4], &[0x40, 0x01, 0x00, 0x05]);

    let decoded = ChannelData::decode(&raw)?;
    assert_eq!(decoded, cd);
    Ok(())
}

#[test]
fn test_channel_data_sniff() {
    assert!(is_channel_data(&[0x40, 0x00, 0x00, 0x00]));
    assert!(is_channel_data(&[0x7f, 0xfe, 0x00, 0x00]));
    assert!(!is_channel_data(&[0x00, 0x01, 0x00, 0x00])); // STUN
    assert!(!is_channel_data(&[0x80, 0x00, 0x00, 0x00])); // RTP
    assert!(!is_channel_data(&[0x40]));
}

#[test]
fn test_channel_data_bad_frames() {
    assert_eq!(ChannelData::decode(&[0x40]), Err(Error::ErrUnexpectedEof));
    assert_eq!(
        ChannelData::decode(&[0x20, 0x00, 0x00, 0x00]),
        Err(Error::ErrInvalidChannelNumber)
    );
    assert_eq!(
        ChannelData::decode(&[0x40, 0x00, 0x00, 0x05, 1, 2]),
        Err(Error::ErrBadChannelDataLength)
    );
}

#[test]
fn test_channel_data_trailing_bytes_ignored() -> Result<()> {
    // a UDP read may hand us a buffer bigger than the frame
    let mut raw = ChannelData::new(0x4abc, vec![9, 9]).encode();
    raw.extend_from_slice(&[0, 0]);
    let decoded = ChannelData::decode(&raw)?;
    assert_eq!(decoded.data, vec![9, 9]);
    Ok(())
}
