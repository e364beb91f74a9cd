use std::fmt;

/// Identity of one solver instance, unique within its registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SolverId(u32);

impl fmt::Display for SolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "solver#{}", self.0)
    }
}

/// Hands out increasing solver ids. Owned by whoever creates solvers and
/// passed down explicitly.
#[derive(Debug, Default)]
pub struct SolverRegistry {
    next: u32,
}

impl SolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> SolverId {
        let id = SolverId(self.next);
        self.next = self.next.wrapping_add(1);
        log::debug!("allocated {id}");
        id
    }

    pub fn issued(&self) -> u32 {
        self.next
    }
}
