//! FUSE flag types.

pub(crate) mod init_flags;
