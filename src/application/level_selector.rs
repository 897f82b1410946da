// Pyramid level selection from pixel width and series resolution
use crate::infrastructure::config::WindowSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChoice {
    pub level: u32,
    pub budget: u64,
    /// Points expected at `level` for the requested span.
    pub estimated_points: u64,
}

#[derive(Debug, Clone)]
pub struct LevelSelector {
    factor: f64,
    min_budget: u64,
    max_budget: u64,
}

impl LevelSelector {
    pub fn new(factor: f64, min_budget: u64, max_budget: u64) -> Self {
        Self {
            factor,
            min_budget,
            max_budget: max_budget.max(min_budget),
        }
    }

    pub fn from_settings(settings: &WindowSettings) -> Self {
        Self::new(
            settings.budget_factor,
            settings.min_budget,
            settings.max_budget,
        )
    }

    pub fn budget(&self, pixel_width: f64) -> u64 {
        let raw = (pixel_width * self.factor).round();
        if !raw.is_finite() || raw <= self.min_budget as f64 {
            return self.min_budget;
        }
        (raw as u64).clamp(self.min_budget, self.max_budget)
    }

    /// Smallest level whose estimated point count fits the budget, or
    /// `max_level` when none does.
    pub fn choose_level(
        &self,
        from_depth: f64,
        to_depth: f64,
        pixel_width: f64,
        base_resolution: f64,
        max_level: u32,
    ) -> LevelChoice {
        let budget = self.budget(pixel_width);
        let span = (to_depth - from_depth).abs();

        for level in 0..=max_level {
            let estimated_points = estimate_points(span, base_resolution, level);
            if estimated_points <= budget {
                return LevelChoice {
                    level,
                    budget,
                    estimated_points,
                };
            }
        }

        LevelChoice {
            level: max_level,
            budget,
            estimated_points: estimate_points(span, base_resolution, max_level),
        }
    }
}

fn estimate_points(span: f64, base_resolution: f64, level: u32) -> u64 {
    if !base_resolution.is_finite() || base_resolution <= 0.0 || !span.is_finite() || span <= 0.0 {
        return 0;
    }
    let step = base_resolution * 2f64.powi(level as i32);
    (span / step).ceil() as u64
}
