use bytes::Bytes;

/// Payload is a run of field bytes which is either owned, or borrowed
/// zero-copy from the buffer a message was unmarshaled from.
///
/// Decoded length-prefixed fields start out as `Shared` views; the first
/// mutation promotes them to an owned vector.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Owned(Vec<u8>),
    Shared(Bytes),
}

impl Payload {
    pub fn empty() -> Payload {
        Payload::Owned(Vec::new())
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Owned(v) => v,
            Payload::Shared(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Promote to an owned vector and return it for mutation.
    pub fn to_mut(&mut self) -> &mut Vec<u8> {
        if let Payload::Shared(b) = self {
            *self = Payload::Owned(b.to_vec());
        }
        match self {
            Payload::Owned(v) => v,
            Payload::Shared(_) => unreachable!(),
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Payload) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Payload {
        Payload::Owned(v)
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Payload {
        Payload::Shared(b)
    }
}
