use crate::error::Result;
use crate::store::UnitOfWork;

/// Heights missing between a starting height and the highest stored height.
///
/// Built from the ascending list of stored heights; the missing ones are
/// produced on demand.
#[derive(Debug)]
pub struct SkippedHeights {
    expected: u32,
    present: std::vec::IntoIter<u32>,
    upcoming: Option<u32>,
}

impl SkippedHeights {
    /// `present` must be ascending and contain no height below `start`.
    pub fn new(start: u32, present: Vec<u32>) -> Self {
        let mut present = present.into_iter();
        let upcoming = present.next();
        Self {
            expected: start,
            present,
            upcoming,
        }
    }
}

impl Iterator for SkippedHeights {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            let present = self.upcoming?;
            if self.expected < present {
                let missing = self.expected;
                self.expected += 1;
                return Some(missing);
            }
            self.upcoming = match present.checked_add(1) {
                Some(next) => {
                    self.expected = next;
                    self.present.next()
                }
                None => None,
            };
        }
    }
}

pub fn skipped_heights(uow: &mut dyn UnitOfWork, start: u32) -> Result<SkippedHeights> {
    let present = uow.heights_from(start)?;
    Ok(SkippedHeights::new(start, present))
}
