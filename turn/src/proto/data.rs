use stun::attributes::ATTR_DATA;
use stun::message::*;

/// Data represents the DATA attribute: the application payload of a Send or
/// Data indication.
///
/// RFC 5766 Section 14.4
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Data(pub Vec<u8>);

impl Setter for Data {
    fn add_to(&self, m: &mut Message) -> stun::Result<()> {
        m.add(ATTR_DATA, &self.0);
        Ok(())
    }
}

impl Getter for Data {
    fn get_from(&mut self, m: &Message) -> stun::Result<()> {
        self.0 = m.get(ATTR_DATA)?;
        Ok(())
    }
}

#[cfg(test)]
mod data_test {
    use super::*;

    #[test]
    fn test_data_round_trip() -> stun::Result<()> {
        let mut m = Message::new();
        let d = Data(vec![1, 2, 3, 4, 5, 6, 7]);
        d.add_to(&mut m)?;

        let mut got = Data::default();
        got.get_from(&m)?;
        assert_eq!(got, d);
        Ok(())
    }
}
