use crate::SampleError;
use sysinfo::Networks;

/// Source of the raw cumulative byte counter sampled once per tick.
pub trait CounterSource: Send {
    fn read_counter(&mut self) -> Result<u64, SampleError>;
}

/// Sums received + transmitted bytes over a fixed set of interfaces.
pub struct InterfaceCounters {
    interfaces: Vec<String>,
    networks: Networks,
}

impl InterfaceCounters {
    pub fn new(interfaces: Vec<String>) -> Self {
        Self {
            interfaces,
            networks: Networks::new_with_refreshed_list(),
        }
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Configured interfaces the host does not currently have.
    pub fn missing_interfaces(&mut self) -> Vec<String> {
        self.networks.refresh_list();
        let present: Vec<&str> = self.networks.iter().map(|(name, _)| name.as_str()).collect();
        self.interfaces
            .iter()
            .filter(|i| !present.contains(&i.as_str()))
            .cloned()
            .collect()
    }

    /// Startup check: every configured interface must exist.
    pub fn verify(&mut self) -> Result<(), SampleError> {
        let missing = self.missing_interfaces();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SampleError::InterfaceMissing(missing.join(", ")))
        }
    }
}

impl CounterSource for InterfaceCounters {
    fn read_counter(&mut self) -> Result<u64, SampleError> {
        // Re-list so interfaces that were re-created (e.g. after a driver
        // reset) are picked up instead of reporting stale totals.
        self.networks.refresh_list();
        let totals = self.networks.iter().map(|(name, data)| {
            (
                name.as_str(),
                data.total_received().wrapping_add(data.total_transmitted()),
            )
        });
        sum_interfaces(totals, &self.interfaces)
    }
}

/// Adds up the counters of `interfaces`. Wrapping addition: a wrapped sum
/// shows up downstream as a counter discontinuity.
pub fn sum_interfaces<'a>(
    totals: impl IntoIterator<Item = (&'a str, u64)>,
    interfaces: &[String],
) -> Result<u64, SampleError> {
    let totals: Vec<(&str, u64)> = totals.into_iter().collect();
    interfaces.iter().try_fold(0u64, |sum, iface| {
        totals
            .iter()
            .find(|(name, _)| *name == iface.as_str())
            .map(|(_, bytes)| sum.wrapping_add(*bytes))
            .ok_or_else(|| SampleError::InterfaceMissing(iface.clone()))
    })
}
