//! Load-more driver with physical scroll measurement.

use tracing::debug;

use crate::browser::{LoadMore, Session, SessionError};

/// Scroll offsets around one load-more action, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollReport {
    pub position_before: f64,
    pub position_after: f64,
    /// Absolute movement between the two measurements.
    pub distance_px: f64,
    pub is_effective: bool,
}

impl ScrollReport {
    pub fn new(position_before: f64, position_after: f64, min_distance_px: f64) -> Self {
        let distance_px = (position_after - position_before).abs();
        Self {
            position_before,
            position_after,
            distance_px,
            is_effective: distance_px >= min_distance_px,
        }
    }
}

/// Triggers the page's load-more affordance and measures how far the
/// viewport actually moved. Exhaustion is judged from these metrics, never
/// from the absence of new records.
pub struct ScrollDriver {
    action: LoadMore,
    min_distance_px: f64,
    attempts: u32,
}

impl ScrollDriver {
    pub fn new(action: LoadMore, min_distance_px: f64) -> Self {
        Self {
            action,
            min_distance_px,
            attempts: 0,
        }
    }

    /// Load-more actions issued so far (successful or not).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn advance(&mut self, session: &mut dyn Session) -> Result<ScrollReport, SessionError> {
        self.attempts += 1;
        let container = self.action.container();

        let before = session.scroll_position(container).await?;
        session.load_more(&self.action).await?;
        let after = session.scroll_position(container).await?;

        let report = ScrollReport::new(before, after, self.min_distance_px);
        debug!(
            "Scroll #{}: {:.0}px -> {:.0}px ({:.0}px, effective={})",
            self.attempts, before, after, report.distance_px, report.is_effective
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BandwidthPolicy, Viewport};
    use async_trait::async_trait;

    /// Page whose scroll offset advances by a fixed step per load-more.
    struct SteppingPage {
        position: f64,
        step: f64,
        loads: Vec<LoadMore>,
    }

    #[async_trait]
    impl Session for SteppingPage {
        async fn navigate(&mut self, _url: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn intercept_requests(&mut self, _p: BandwidthPolicy) -> Result<(), SessionError> {
            Ok(())
        }
        async fn viewport(&mut self) -> Result<Viewport, SessionError> {
            Ok(Viewport::new("about:blank", ""))
        }
        async fn scroll_position(&mut self, _c: Option<&str>) -> Result<f64, SessionError> {
            Ok(self.position)
        }
        async fn load_more(&mut self, action: &LoadMore) -> Result<(), SessionError> {
            self.loads.push(action.clone());
            self.position += self.step;
            Ok(())
        }
        async fn close(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    #[test]
    fn test_report_threshold() {
        assert!(ScrollReport::new(0.0, 100.0, 100.0).is_effective);
        assert!(!ScrollReport::new(0.0, 99.5, 100.0).is_effective);
        // Upward jumps (page re-layout) count by magnitude.
        let up = ScrollReport::new(500.0, 100.0, 100.0);
        assert_eq!(up.distance_px, 400.0);
        assert!(up.is_effective);
    }

    #[tokio::test]
    async fn test_advance_measures_movement() {
        let mut page = SteppingPage {
            position: 0.0,
            step: 800.0,
            loads: Vec::new(),
        };
        let mut driver = ScrollDriver::new(LoadMore::ScrollToBottom, 100.0);

        let report = driver.advance(&mut page).await.unwrap();
        assert_eq!(report.position_before, 0.0);
        assert_eq!(report.position_after, 800.0);
        assert!(report.is_effective);

        page.step = 10.0;
        let report = driver.advance(&mut page).await.unwrap();
        assert!(!report.is_effective);
        assert_eq!(driver.attempts(), 2);
        assert_eq!(page.loads.len(), 2);
    }
}
