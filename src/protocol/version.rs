//! Private-version negotiation and the converter chain that lets a struct's
//! body be translated between adjacent private versions.

use super::error::{CspError, Result};
use super::uuid::Uuid;

/// One link in a struct's private-version converter chain: translates a
/// decoded body between version `from` and the adjacent version `to`
/// (`to == from + 1` for an "up" converter, `to == from - 1` for a "down"
/// converter).
///
/// Implementations live alongside the struct they convert; the engine only
/// needs to walk the chain, so this trait is generic over an opaque body
/// representation supplied by the caller.
pub trait VersionConverter<Body> {
    /// The private version this converter reads.
    fn from_version(&self) -> u32;
    /// The private version this converter produces.
    fn to_version(&self) -> u32;
    /// Converts `body` from [`from_version`](Self::from_version) to
    /// [`to_version`](Self::to_version).
    fn convert(&self, body: Body) -> Result<Body>;
}

/// An ordered chain of converters for one struct identity, used to walk a
/// decoded body up to the version the caller asked for.
pub struct ConverterChain<Body> {
    id: Uuid,
    /// Converters ordered by ascending `from_version`; `converters[i]` must
    /// satisfy `from_version() == i` and `to_version() == i + 1`.
    up: Vec<Box<dyn VersionConverter<Body>>>,
}

impl<Body> ConverterChain<Body> {
    /// Creates a chain for struct `id` from its "up" converters, ordered by
    /// ascending source version.
    pub fn new(id: Uuid, up: Vec<Box<dyn VersionConverter<Body>>>) -> Self {
        Self { id, up }
    }

    /// Translates `body`, decoded at private version `from`, up to private
    /// version `to`. `from` and `to` may be equal, in which case `body` is
    /// returned unchanged.
    pub fn translate_up(&self, body: Body, from: u32, to: u32) -> Result<Body> {
        if from > to {
            return Err(CspError::NoSuchConverter {
                id: self.id,
                from,
                to,
            });
        }

        let mut current = body;
        let mut version = from;
        while version < to {
            let converter = self
                .up
                .iter()
                .find(|c| c.from_version() == version)
                .ok_or(CspError::NoSuchConverter {
                    id: self.id,
                    from: version,
                    to,
                })?;
            current = converter.convert(current)?;
            version = converter.to_version();
        }
        Ok(current)
    }
}

/// Negotiates the private version a sender should encode a struct at, given
/// the sender's latest known version, the receiver's latest known version,
/// and the receiver's declared floor (the oldest version it still has a
/// converter chain for).
///
/// Returns the negotiated version, which is always
/// `min(sender_latest, receiver_latest)`, or an error if that minimum falls
/// below the receiver's floor.
pub fn negotiate_version(
    id: Uuid,
    sender_latest: u32,
    receiver_latest: u32,
    receiver_min_supported: u32,
) -> Result<u32> {
    let negotiated = sender_latest.min(receiver_latest);
    if negotiated < receiver_min_supported {
        return Err(CspError::NoSuchConverter {
            id,
            from: negotiated,
            to: receiver_min_supported,
        });
    }
    Ok(negotiated)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AddOne;
    impl VersionConverter<u32> for AddOne {
        fn from_version(&self) -> u32 {
            0
        }
        fn to_version(&self) -> u32 {
            1
        }
        fn convert(&self, body: u32) -> Result<u32> {
            Ok(body + 1)
        }
    }

    struct TimesTwo;
    impl VersionConverter<u32> for TimesTwo {
        fn from_version(&self) -> u32 {
            1
        }
        fn to_version(&self) -> u32 {
            2
        }
        fn convert(&self, body: u32) -> Result<u32> {
            Ok(body * 2)
        }
    }

    fn sample_id() -> Uuid {
        Uuid::from_fields(1, 2, 3, 4, 5)
    }

    #[test]
    fn chain_walks_multiple_links() {
        let chain = ConverterChain::new(sample_id(), vec![Box::new(AddOne), Box::new(TimesTwo)]);
        assert_eq!(chain.translate_up(10, 0, 2).unwrap(), 22);
    }

    #[test]
    fn chain_no_op_when_already_at_target() {
        let chain: ConverterChain<u32> = ConverterChain::new(sample_id(), vec![]);
        assert_eq!(chain.translate_up(5, 3, 3).unwrap(), 5);
    }

    #[test]
    fn chain_missing_link_is_reported() {
        let chain = ConverterChain::new(sample_id(), vec![Box::new(AddOne)]);
        let err = chain.translate_up(10, 0, 2).unwrap_err();
        assert!(matches!(err, CspError::NoSuchConverter { from: 1, to: 2, .. }));
    }

    #[test]
    fn negotiation_picks_the_minimum() {
        let version = negotiate_version(sample_id(), 5, 3, 0).unwrap();
        assert_eq!(version, 3);
    }

    #[test]
    fn negotiation_fails_below_receiver_floor() {
        let err = negotiate_version(sample_id(), 5, 3, 4).unwrap_err();
        assert!(matches!(err, CspError::NoSuchConverter { from: 3, to: 4, .. }));
    }
}
