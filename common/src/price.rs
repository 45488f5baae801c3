/// Running average of price samples within a fixed time bucket.
///
/// A sample whose bucket index `floor(now / duration)` differs from the current one
/// starts a fresh window, so the average always covers a single bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceWindow {
    duration_secs: f64,
    bucket: Option<i64>,
    samples: Vec<f64>,
}

impl PriceWindow {
    pub fn new(duration_secs: f64) -> Self {
        assert!(
            duration_secs.is_finite() && duration_secs > 0.0,
            "price window duration must be positive, got {duration_secs}"
        );
        Self {
            duration_secs,
            bucket: None,
            samples: Vec::new(),
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn bucket_for(&self, now: f64) -> i64 {
        (now / self.duration_secs).floor() as i64
    }

    /// Adds a sample and returns the average of the bucket it landed in.
    pub fn add(&mut self, price: f64, now: f64) -> f64 {
        let bucket = self.bucket_for(now);
        if self.bucket != Some(bucket) {
            self.bucket = Some(bucket);
            self.samples.clear();
        }
        self.samples.push(price);
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
