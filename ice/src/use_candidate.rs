use stun::attributes::ATTR_USE_CANDIDATE;
use stun::message::*;

/// USE-CANDIDATE attribute. Present (empty) on the Binding request a
/// controlling agent sends to nominate a pair.
#[derive(Default)]
pub struct UseCandidateAttr;

impl Setter for UseCandidateAttr {
    fn add_to(&self, m: &mut Message) -> stun::Result<()> {
        m.add(ATTR_USE_CANDIDATE, &[]);
        Ok(())
    }
}

impl UseCandidateAttr {
    /// Returns true if m carries USE-CANDIDATE.
    pub fn is_set(m: &Message) -> bool {
        m.contains(ATTR_USE_CANDIDATE)
    }
}
