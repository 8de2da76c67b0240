use serde::Serialize;
use utoipa::ToSchema;

/// Bytes per correlation sample: a complex128 stored as two little-endian f64.
pub const SAMPLE_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StationType {
    Core,
    Remote,
    International,
}

impl StationType {
    pub fn from_name(name: &str) -> Self {
        let prefix = name.trim().get(..2).unwrap_or_default().to_ascii_uppercase();
        match prefix.as_str() {
            "CS" => StationType::Core,
            "RS" => StationType::Remote,
            _ => StationType::International,
        }
    }

    /// Number of receiver units (RCUs), which is also the side of the
    /// correlation matrix.
    pub fn receiver_channels(&self) -> usize {
        match self {
            StationType::Core | StationType::Remote => 96,
            StationType::International => 192,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub name: String,
    pub station_type: StationType,
    pub rcu_mode: u8,
    pub height_m: f64,
    pub extent_m: f64,
}

impl Station {
    pub fn new(name: &str, rcu_mode: u8, height_m: f64, extent_m: f64) -> Self {
        Self {
            name: name.to_string(),
            station_type: StationType::from_name(name),
            rcu_mode,
            height_m,
            extent_m,
        }
    }

    pub fn block_dimension(&self) -> usize {
        self.station_type.receiver_channels()
    }

    pub fn block_samples(&self) -> usize {
        self.block_dimension() * self.block_dimension()
    }

    pub fn block_bytes(&self) -> usize {
        self.block_samples() * SAMPLE_BYTES
    }

    /// Near-field image bounds as `[x_min, x_max, y_min, y_max]` in metres.
    pub fn extent(&self) -> [f64; 4] {
        [-self.extent_m, self.extent_m, -self.extent_m, self.extent_m]
    }

    pub fn pixels_per_metre(&self) -> f64 {
        let [x0, x1, y0, y1] = self.extent();
        let max_range = (x1 - x0).max(y1 - y0);
        if max_range > 0.0 {
            150.0 / max_range
        } else {
            0.0
        }
    }
}
