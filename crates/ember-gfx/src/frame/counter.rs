#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameLabel {
    A,
    B,
    C,
    D,
}

impl FrameLabel {
    #[inline]
    pub fn from_usize(index: usize) -> Self {
        match index {
            0 => FrameLabel::A,
            1 => FrameLabel::B,
            2 => FrameLabel::C,
            3 => FrameLabel::D,
            _ => panic!("invalid frame slot: {index}"),
        }
    }
}

impl std::fmt::Display for FrameLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = match self {
            FrameLabel::A => 'A',
            FrameLabel::B => 'B',
            FrameLabel::C => 'C',
            FrameLabel::D => 'D',
        };
        write!(f, "{c}")
    }
}

pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    /// frames in flight 的数量，也就是 frame slot 的数量
    fif_count: usize,
}
// new & init
impl FrameCounter {
    pub fn new(fif_count: usize) -> Self {
        debug_assert!((1..=4).contains(&fif_count));
        Self { frame_id: 0, fif_count }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn fif_count(&self) -> usize {
        self.fif_count
    }
    #[inline]
    pub fn slot_index(&self) -> usize {
        (self.frame_id % self.fif_count as u64) as usize
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_usize(self.slot_index())
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_rotate_round_robin() {
        let mut counter = FrameCounter::new(3);
        let slots: Vec<_> = (0..7)
            .map(|_| {
                let slot = counter.slot_index();
                counter.next_frame();
                slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(counter.frame_name(), "[F7B]");
    }
}
