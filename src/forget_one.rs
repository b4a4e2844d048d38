use crate::INodeNo;
use crate::ll::fuse_abi::fuse_forget_one;

/// One forget entry as encoded in a Forget or BatchForget frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForgetOne {
    nodeid: INodeNo,
    nlookup: u64,
}

impl ForgetOne {
    /// Inode number.
    pub fn nodeid(&self) -> INodeNo {
        self.nodeid
    }

    /// Number of lookups to drop.
    pub fn nlookup(&self) -> u64 {
        self.nlookup
    }

    pub(crate) fn new(nodeid: INodeNo, nlookup: u64) -> Self {
        Self { nodeid, nlookup }
    }
}

impl From<fuse_forget_one> for ForgetOne {
    fn from(one: fuse_forget_one) -> Self {
        Self::new(INodeNo(one.nodeid), one.nlookup)
    }
}
