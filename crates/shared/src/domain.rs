use serde::{Deserialize, Serialize};

/// Number of independently addressable axes on the rig.
pub const AXIS_COUNT: usize = 4;

/// Physical positions for all four axes, index-aligned to [`Axis`] ordinals.
/// Values are integer step counts; hardware is authoritative for limits.
pub type PositionVector = [i64; AXIS_COUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
    A,
}

impl Axis {
    pub const ALL: [Axis; AXIS_COUNT] = [Axis::X, Axis::Y, Axis::Z, Axis::A];

    pub fn ordinal(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::A => 3,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::A => 'A',
        }
    }

    /// Case-sensitive; only the exact letters X/Y/Z/A name an axis.
    pub fn from_letter(letter: char) -> Option<Axis> {
        match letter {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'A' => Some(Axis::A),
            _ => None,
        }
    }

    pub fn from_ordinal(ordinal: usize) -> Option<Axis> {
        Axis::ALL.get(ordinal).copied()
    }
}

/// A timestamped snapshot of all four axis positions. Times are seconds
/// relative to the start of the choreography clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f64,
    pub positions: PositionVector,
}

/// Ordered keyframe sequence, kept sorted ascending by time after every
/// mutation. Equal timestamps keep insertion order (stable sort).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Choreography {
    keyframes: Vec<Keyframe>,
}

impl Choreography {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_keyframes(mut keyframes: Vec<Keyframe>) -> Self {
        keyframes.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keyframes }
    }

    pub fn push(&mut self, keyframe: Keyframe) {
        self.keyframes.push(keyframe);
        self.keyframes.sort_by(|a, b| a.time.total_cmp(&b.time));
    }

    /// Removes one keyframe; remaining time values are untouched.
    pub fn remove(&mut self, index: usize) -> Option<Keyframe> {
        if index < self.keyframes.len() {
            Some(self.keyframes.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.keyframes.clear();
    }

    pub fn get(&self, index: usize) -> Option<&Keyframe> {
        self.keyframes.get(index)
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Keyframe> {
        self.keyframes.iter()
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn last_time(&self) -> Option<f64> {
        self.keyframes.last().map(|kf| kf.time)
    }
}

pub const CHOREOGRAPHY_FORMAT_VERSION: &str = "1.0";

fn default_version() -> String {
    CHOREOGRAPHY_FORMAT_VERSION.to_string()
}

/// Persisted container for a choreography and the reverse-flag vector.
/// Missing fields degrade: no keyframes means empty, no flags means the
/// caller leaves its current flags unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoreographyFile {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, rename = "choreography")]
    pub keyframes: Vec<Keyframe>,
    #[serde(default, rename = "reverseFlags", skip_serializing_if = "Option::is_none")]
    pub reverse_flags: Option<[bool; AXIS_COUNT]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choreography_stays_sorted_after_push() {
        let mut choreo = Choreography::new();
        choreo.push(Keyframe { time: 2.0, positions: [2, 0, 0, 0] });
        choreo.push(Keyframe { time: 0.5, positions: [1, 0, 0, 0] });
        choreo.push(Keyframe { time: 1.0, positions: [3, 0, 0, 0] });

        let times: Vec<f64> = choreo.iter().map(|kf| kf.time).collect();
        assert_eq!(times, vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let mut choreo = Choreography::new();
        choreo.push(Keyframe { time: 1.0, positions: [1, 0, 0, 0] });
        choreo.push(Keyframe { time: 1.0, positions: [2, 0, 0, 0] });
        choreo.push(Keyframe { time: 1.0, positions: [3, 0, 0, 0] });

        let order: Vec<i64> = choreo.iter().map(|kf| kf.positions[0]).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn remove_keeps_remaining_times() {
        let mut choreo = Choreography::new();
        choreo.push(Keyframe { time: 0.0, positions: [0; 4] });
        choreo.push(Keyframe { time: 1.0, positions: [1, 1, 1, 1] });
        choreo.push(Keyframe { time: 2.0, positions: [2, 2, 2, 2] });

        let removed = choreo.remove(1).expect("keyframe");
        assert_eq!(removed.time, 1.0);
        let times: Vec<f64> = choreo.iter().map(|kf| kf.time).collect();
        assert_eq!(times, vec![0.0, 2.0]);

        assert!(choreo.remove(5).is_none());
    }

    #[test]
    fn file_missing_fields_degrade_to_defaults() {
        let file: ChoreographyFile = serde_json::from_str("{}").expect("json");
        assert_eq!(file.version, CHOREOGRAPHY_FORMAT_VERSION);
        assert!(file.keyframes.is_empty());
        assert!(file.reverse_flags.is_none());
    }

    #[test]
    fn file_round_trips_through_json() {
        let file = ChoreographyFile {
            version: CHOREOGRAPHY_FORMAT_VERSION.to_string(),
            keyframes: vec![Keyframe { time: 0.0, positions: [1, 2, 3, 4] }],
            reverse_flags: Some([true, false, false, true]),
        };
        let bytes = serde_json::to_vec(&file).expect("serialize");
        let back: ChoreographyFile = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(back, file);
    }

    #[test]
    fn file_uses_persisted_field_names() {
        let file = ChoreographyFile {
            version: CHOREOGRAPHY_FORMAT_VERSION.to_string(),
            keyframes: vec![],
            reverse_flags: Some([false; 4]),
        };
        let value = serde_json::to_value(&file).expect("json");
        assert!(value.get("choreography").is_some());
        assert!(value.get("reverseFlags").is_some());
    }

    #[test]
    fn axis_letters_round_trip() {
        for axis in Axis::ALL {
            assert_eq!(Axis::from_letter(axis.letter()), Some(axis));
            assert_eq!(Axis::from_ordinal(axis.ordinal()), Some(axis));
        }
        assert_eq!(Axis::from_letter('x'), None);
        assert_eq!(Axis::from_letter('H'), None);
    }
}
