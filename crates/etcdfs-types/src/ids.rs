strong_type!(Uid, u32);
strong_type!(Gid, u32);

/// The identity every entry of a mount is presented with.
///
/// Captured once at startup and passed by value into the attribute layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ownership {
    pub uid: Uid,
    pub gid: Gid,
}

impl Ownership {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid: Uid(uid),
            gid: Gid(gid),
        }
    }

    /// The real uid/gid of the running process.
    pub fn current() -> Self {
        // SAFETY: getuid/getgid have no preconditions and cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self::new(uid, gid)
    }
}
