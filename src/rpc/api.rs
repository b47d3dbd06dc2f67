use crate::rpc::error::ErrorCode;

macro_rules! repr_enum {
    (
        $repr:ty;
        $(#[$outer:meta])*
        $vis:vis enum $name:ident {
            $($(#[$meta:meta])* $v:ident = $i:literal,)+
        }
    ) => {
        $(#[$outer])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[repr($repr)]
        $vis enum $name {
            $($(#[$meta])* $v = $i,)+
        }

        impl TryFrom<$repr> for $name {
            type Error = ErrorCode;

            fn try_from(value: $repr) -> Result<Self, Self::Error> {
                match value {
                    $($i => Ok($name::$v),)+
                    _ => Err(ErrorCode::INVALID_REQUEST),
                }
            }
        }

        impl From<$name> for $repr {
            #[inline]
            fn from(value: $name) -> Self {
                value as $repr
            }
        }
    };
}

repr_enum! { i16;
    /// Request types served over the RPC transport.
    ///
    /// There is no produce stream: a producer streams records by pipelining `Produce` requests on
    /// one connection. Each request is answered on its own, so a failed append is reported in its
    /// response and later requests are still served. A producer that must stop at the first
    /// failure does so on seeing a non-zero error code.
    pub enum ApiKey {
        /// Append a single record
        Produce = 0,
        /// Read a single record at an offset
        Consume = 1,
        /// Read records starting at an offset until the client goes away
        ConsumeStream = 2,
    }
}

impl ApiKey {
    // INT16 repr
    pub const SIZE: usize = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_repr() {
        for key in [ApiKey::Produce, ApiKey::Consume, ApiKey::ConsumeStream] {
            let repr = i16::from(key);
            assert_eq!(Ok(key), ApiKey::try_from(repr));
        }

        assert_eq!(Err(ErrorCode::INVALID_REQUEST), ApiKey::try_from(18));
        assert_eq!(Err(ErrorCode::INVALID_REQUEST), ApiKey::try_from(-1));
    }
}
