//! Bounded LRU of agents keyed by fingerprint.

use super::agent::Agent;
use super::fingerprint::{fingerprint, AgentClass};
use crate::base::neterror::NetError;
use crate::base::timeline::Timeline;
use crate::config::DEFAULT_AGENT_CACHE_CAPACITY;
use crate::socket::proxy::ProxySettings;
use crate::socket::tls::TlsOptions;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Agents ordered least- to most-recently used.
#[derive(Debug)]
pub struct AgentCache {
    capacity: usize,
    entries: Mutex<VecDeque<Arc<Agent>>>,
}

impl Default for AgentCache {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_CACHE_CAPACITY)
    }
}

impl AgentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<Agent>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the agent for this configuration, creating it on a miss.
    ///
    /// A hit becomes most-recently used and is rebound to `timeline` when
    /// one is given; `None` keeps the current binding. The lock is never
    /// held while an agent is built or destroyed.
    pub fn get_or_create_agent(
        &self,
        class: AgentClass,
        options: &TlsOptions,
        proxy: Option<&ProxySettings>,
        timeline: Option<&Timeline>,
    ) -> Result<Arc<Agent>, NetError> {
        let key = fingerprint(class, options, proxy.map(|p| p.uri()));

        if let Some(agent) = self.touch(&key) {
            if let Some(tl) = timeline {
                agent.bind_timeline(Some(tl));
                tl.info(class.reuse_message());
            }
            return Ok(agent);
        }

        let agent = Arc::new(Agent::new(
            class,
            key.clone(),
            options,
            proxy.cloned(),
            timeline,
        )?);

        let evicted = {
            let mut entries = self.lock();
            // Another caller may have inserted the same key meanwhile.
            if let Some(pos) = entries.iter().position(|a| a.fingerprint() == key) {
                if let Some(existing) = entries.remove(pos) {
                    entries.push_back(existing.clone());
                    if timeline.is_some() {
                        existing.bind_timeline(timeline);
                    }
                    return Ok(existing);
                }
            }
            let mut evicted = Vec::new();
            while entries.len() >= self.capacity {
                match entries.pop_front() {
                    Some(old) => evicted.push(old),
                    None => break,
                }
            }
            entries.push_back(agent.clone());
            evicted
        };

        for old in evicted {
            tracing::debug!("evicting least recently used agent");
            if let Err(e) = old.destroy() {
                tracing::warn!("failed to destroy evicted agent: {}", e);
            }
        }
        Ok(agent)
    }

    fn touch(&self, key: &str) -> Option<Arc<Agent>> {
        let mut entries = self.lock();
        let pos = entries.iter().position(|a| a.fingerprint() == key)?;
        let agent = entries.remove(pos)?;
        entries.push_back(agent.clone());
        Some(agent)
    }

    /// Destroy and forget every agent.
    pub fn clear(&self) {
        let drained: Vec<_> = self.lock().drain(..).collect();
        for agent in drained {
            if let Err(e) = agent.destroy() {
                tracing::warn!("failed to destroy agent: {}", e);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(min_version: &str) -> TlsOptions {
        TlsOptions {
            min_version: min_version.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_hit_returns_same_instance() {
        let cache = AgentCache::default();
        let a = cache
            .get_or_create_agent(AgentClass::Https, &TlsOptions::default(), None, None)
            .unwrap();
        let tl = Timeline::new();
        let b = cache
            .get_or_create_agent(AgentClass::Https, &TlsOptions::default(), None, Some(&tl))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            tl.messages(),
            vec!["Reusing cached agent (SSL session reuse enabled)"]
        );
        assert!(b.timeline().unwrap().same_as(&tl));
    }

    #[test]
    fn test_hit_without_timeline_keeps_binding() {
        let cache = AgentCache::default();
        let tl = Timeline::new();
        let agent = cache
            .get_or_create_agent(AgentClass::Https, &TlsOptions::default(), None, Some(&tl))
            .unwrap();
        let again = cache
            .get_or_create_agent(AgentClass::Https, &TlsOptions::default(), None, None)
            .unwrap();
        assert!(Arc::ptr_eq(&agent, &again));
        assert!(again.timeline().unwrap().same_as(&tl));
    }

    #[test]
    fn test_distinct_options_distinct_agents() {
        let cache = AgentCache::default();
        let secure = cache
            .get_or_create_agent(AgentClass::Https, &TlsOptions::default(), None, None)
            .unwrap();
        let insecure = TlsOptions {
            reject_unauthorized: false,
            ..Default::default()
        };
        let other = cache
            .get_or_create_agent(AgentClass::Https, &insecure, None, None)
            .unwrap();
        let proxy = ProxySettings::parse("http://proxy.local:8080").unwrap();
        let proxied = cache
            .get_or_create_agent(AgentClass::Https, &TlsOptions::default(), Some(&proxy), None)
            .unwrap();
        assert!(!Arc::ptr_eq(&secure, &other));
        assert!(!Arc::ptr_eq(&secure, &proxied));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_lru_eviction_destroys_once() {
        let cache = AgentCache::new(2);
        let versions = ["TLSv1", "TLSv1.1", "TLSv1.2"];
        let agents: Vec<_> = versions
            .iter()
            .map(|v| {
                cache
                    .get_or_create_agent(AgentClass::Https, &options(v), None, None)
                    .unwrap()
            })
            .collect();

        assert_eq!(cache.len(), 2);
        assert!(agents[0].is_destroyed());
        assert!(!agents[1].is_destroyed());
        // Eviction already tore it down; a second teardown is refused.
        assert!(agents[0].destroy().is_err());
    }

    #[test]
    fn test_hit_refreshes_recency() {
        let cache = AgentCache::new(2);
        let first = cache
            .get_or_create_agent(AgentClass::Https, &options("TLSv1"), None, None)
            .unwrap();
        let second = cache
            .get_or_create_agent(AgentClass::Https, &options("TLSv1.1"), None, None)
            .unwrap();
        cache
            .get_or_create_agent(AgentClass::Https, &options("TLSv1"), None, None)
            .unwrap();
        cache
            .get_or_create_agent(AgentClass::Https, &options("TLSv1.2"), None, None)
            .unwrap();
        assert!(!first.is_destroyed());
        assert!(second.is_destroyed());
    }

    #[test]
    fn test_clear() {
        let cache = AgentCache::default();
        let a = cache
            .get_or_create_agent(AgentClass::Http, &TlsOptions::default(), None, None)
            .unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert!(a.is_destroyed());
    }

    #[test]
    fn test_default_capacity_is_bounded() {
        let cache = AgentCache::default();
        let agents: Vec<_> = (0..=DEFAULT_AGENT_CACHE_CAPACITY)
            .map(|i| {
                let proxy = ProxySettings::parse(&format!("http://proxy{}.local:8080", i)).unwrap();
                cache
                    .get_or_create_agent(AgentClass::Http, &TlsOptions::default(), Some(&proxy), None)
                    .unwrap()
            })
            .collect();

        assert_eq!(agents.len(), 101);
        assert_eq!(cache.len(), 100);
        assert!(agents[0].is_destroyed());
        assert!(agents[1..].iter().all(|a| !a.is_destroyed()));
    }
}
