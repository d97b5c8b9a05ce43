/// Read-through cache over the catalog endpoints (agents, plans, subscriptions)
///
/// Reads are best-effort: a failed fetch logs a warning and yields an empty
/// list, and is not cached so the next read retries. `refresh()` is the one
/// invalidation trigger for everything.
use crate::api::BackendApi;
use crate::error::{FridayError, Result};
use crate::models::{Agent, AgentId, Plan, PlanId, Subscription, SubscriptionCreate};
use crate::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Public catalog of active agents
    Agents,
    ActivePlans,
    /// The session user's active subscriptions
    ActiveSubscriptions,
}

#[derive(Debug, Clone)]
enum Cached {
    Agents(Vec<Agent>),
    Plans(Vec<Plan>),
    Subscriptions(Vec<Subscription>),
}

/// Catalog reads for one session.
pub struct CatalogCache {
    api: Arc<dyn BackendApi>,
    entries: RwLock<HashMap<ResourceKind, Cached>>,
}

impl CatalogCache {
    pub fn new(api: Arc<dyn BackendApi>) -> Self {
        Self {
            api,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Agents the user can chat with: those of the first active subscription.
    pub async fn list_active_agents_for_user(&self, session: &Session) -> Vec<Agent> {
        self.list_active_subscriptions(session)
            .await
            .into_iter()
            .next()
            .map(|sub| sub.agents)
            .unwrap_or_default()
    }

    pub async fn list_active_subscriptions(&self, session: &Session) -> Vec<Subscription> {
        if let Some(Cached::Subscriptions(subs)) =
            self.cached(ResourceKind::ActiveSubscriptions).await
        {
            return subs;
        }
        match self.api.list_active_subscriptions(session).await {
            Ok(subs) => {
                debug!("Fetched {} active subscriptions", subs.len());
                self.store(ResourceKind::ActiveSubscriptions, Cached::Subscriptions(subs.clone()))
                    .await;
                subs
            }
            Err(e) => {
                warn!("Active subscriptions unavailable: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn list_active_plans(&self) -> Vec<Plan> {
        if let Some(Cached::Plans(plans)) = self.cached(ResourceKind::ActivePlans).await {
            return plans;
        }
        match self.api.list_active_plans().await {
            Ok(plans) => {
                self.store(ResourceKind::ActivePlans, Cached::Plans(plans.clone()))
                    .await;
                plans
            }
            Err(e) => {
                warn!("Active plans unavailable: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        if let Some(Cached::Agents(agents)) = self.cached(ResourceKind::Agents).await {
            return agents;
        }
        match self.api.list_active_agents().await {
            Ok(agents) => {
                self.store(ResourceKind::Agents, Cached::Agents(agents.clone()))
                    .await;
                agents
            }
            Err(e) => {
                warn!("Agent catalog unavailable: {}", e);
                Vec::new()
            }
        }
    }

    /// Subscribe to a plan with a chosen set of agents.
    ///
    /// Unlike reads this propagates errors: the user asked for it.
    pub async fn create_subscription(
        &self,
        session: &Session,
        plan_id: PlanId,
        agent_ids: Vec<AgentId>,
    ) -> Result<Subscription> {
        if agent_ids.is_empty() {
            return Err(FridayError::Validation(
                "select at least one agent".to_string(),
            ));
        }
        if let Some(Cached::Plans(plans)) = self.cached(ResourceKind::ActivePlans).await {
            if let Some(plan) = plans.iter().find(|p| p.id == plan_id) {
                if agent_ids.len() > plan.max_agents as usize {
                    return Err(FridayError::Validation(format!(
                        "plan {} allows at most {} agents",
                        plan.name, plan.max_agents
                    )));
                }
            }
        }

        let body = SubscriptionCreate { plan_id, agent_ids };
        let sub = self.api.create_subscription(session, &body).await?;
        info!("Subscribed to plan {} (subscription {})", plan_id, sub.id);
        self.invalidate(ResourceKind::ActiveSubscriptions).await;
        self.invalidate(ResourceKind::Agents).await;
        Ok(sub)
    }

    pub async fn invalidate(&self, kind: ResourceKind) {
        self.entries.write().await.remove(&kind);
    }

    /// Drop every cached resource; the next reads go to the backend.
    pub async fn refresh(&self) {
        self.entries.write().await.clear();
    }

    async fn cached(&self, kind: ResourceKind) -> Option<Cached> {
        self.entries.read().await.get(&kind).cloned()
    }

    async fn store(&self, kind: ResourceKind, value: Cached) {
        self.entries.write().await.insert(kind, value);
    }
}
