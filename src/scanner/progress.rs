// Blended progress across the detectors of one scan
//
// Each active detector contributes an equal share of the remaining work.
// When a detector finishes, the current total becomes the new base and the
// rest of the range is split over the detectors still running, measured
// from where each of them stands now.

pub(crate) struct ProgressBlend {
    length: u64,
    base: f64,
    /// Position each active detector had when the base was last reset
    anchors: Vec<Option<u64>>,
    positions: Vec<u64>,
    last: f64,
}

impl ProgressBlend {
    pub fn new(detectors: usize, length: u64) -> Self {
        Self {
            length,
            base: 0.0,
            anchors: vec![Some(0); detectors],
            positions: vec![0; detectors],
            last: 0.0,
        }
    }

    pub fn update(&mut self, index: usize, position: u64) {
        if let Some(slot) = self.positions.get_mut(index) {
            *slot = position.min(self.length);
        }
    }

    /// Drop `index` from the active set and re-normalize
    pub fn finish(&mut self, index: usize) {
        if self.anchors.get(index).copied().flatten().is_none() {
            return;
        }
        self.base = self.percent();
        self.anchors[index] = None;
        for (anchor, position) in self.anchors.iter_mut().zip(&self.positions) {
            if anchor.is_some() {
                *anchor = Some(*position);
            }
        }
    }

    pub fn percent(&mut self) -> f64 {
        let active: Vec<f64> = self
            .anchors
            .iter()
            .zip(&self.positions)
            .filter_map(|(anchor, position)| {
                let anchor = (*anchor)?;
                let span = self.length.saturating_sub(anchor);
                Some(if span == 0 {
                    1.0
                } else {
                    position.saturating_sub(anchor) as f64 / span as f64
                })
            })
            .collect();

        let blended = if active.is_empty() {
            100.0
        } else {
            let mean = active.iter().sum::<f64>() / active.len() as f64;
            self.base + (100.0 - self.base) * mean
        };
        self.last = self.last.max(blended.min(100.0));
        self.last
    }
}
