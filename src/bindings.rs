use log::warn;

/// Knob-to-application table. Each knob keeps the name the user picked plus a
/// lowercased copy used as a substring matcher against process names. The knob
/// count is fixed for the lifetime of the controller.
#[derive(Debug, Clone)]
pub struct ChannelBindings {
    apps: Vec<String>,
    matchers: Vec<String>,
}

impl ChannelBindings {
    pub fn new<I, S>(apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let apps: Vec<String> = apps.into_iter().map(Into::into).collect();
        let matchers = apps.iter().map(|a| a.to_lowercase()).collect();
        Self { apps, matchers }
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// Rebinds a knob at runtime. The caller is responsible for forcing a
    /// session refresh so the change takes effect right away.
    pub fn bind(&mut self, channel: usize, app: &str) {
        if channel >= self.apps.len() {
            warn!("bind for unknown knob {channel} ignored");
            return;
        }
        self.matchers[channel] = app.to_lowercase();
        self.apps[channel] = app.to_string();
    }

    /// The matching policy: first knob whose matcher is contained in the
    /// lowercased process name.
    pub fn match_channel(&self, process_name: &str) -> Option<usize> {
        let name = process_name.to_lowercase();
        self.matchers
            .iter()
            .position(|m| !m.is_empty() && name.contains(m.as_str()))
    }

    pub fn names(&self) -> Vec<String> {
        self.apps.clone()
    }
}
