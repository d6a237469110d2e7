use shared::{Step, StepStatus};

/// Ordered step buffer for one turn. Step names are unique and an entry keeps
/// its position once inserted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepList(Vec<Step>);

impl StepList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one update in: replace the entry with the same name in place, or
    /// append when the name is new.
    pub fn merge(&mut self, step: Step) {
        match self.0.iter_mut().find(|s| s.name == step.name) {
            Some(slot) => *slot = step,
            None => self.0.push(step),
        }
    }

    /// Copy-on-write variant of [`merge`](Self::merge); `self` is left untouched.
    pub fn merged(&self, step: Step) -> StepList {
        let mut next = self.clone();
        next.merge(step);
        next
    }

    /// Set every entry's status, keeping order and everything else.
    pub fn mark_all(&mut self, status: StepStatus) {
        for step in &mut self.0 {
            step.status = status;
        }
    }

    #[cfg(test)]
    fn get(&self, name: &str) -> Option<&Step> {
        self.0.iter().find(|s| s.name == name)
    }

    pub fn as_slice(&self) -> &[Step] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Step> {
        self.0.clone()
    }

    /// Collapsed header shown above a finished turn's steps.
    pub fn summary(&self) -> String {
        format!("Processing Details ({} steps)", self.0.len())
    }
}

impl FromIterator<Step> for StepList {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        let mut list = StepList::new();
        for step in iter {
            list.merge(step);
        }
        list
    }
}

impl<'a> IntoIterator for &'a StepList {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
