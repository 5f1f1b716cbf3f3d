//! Generic resource pool for reusable connections and clients
//!
//! Resources are pooled per destination with a configurable size limit,
//! acquire timeout, idle timeout and health checking. A checked-out resource
//! is held by a [`PooledResource`] guard: calling [`PooledResource::release`]
//! returns it to the pool, while dropping the guard any other way (timeout,
//! cancellation, panic) discards it because its state is unknown.

use crate::destination::Destination;
use crate::error::{FactoryError, ResilienceError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for resource pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live resources (idle + checked out) per destination
    pub max_size: usize,
    /// Timeout for acquiring a resource when the pool is saturated
    pub acquire_timeout: Duration,
    /// Maximum time a resource can remain idle before being discarded
    pub idle_timeout: Option<Duration>,
    /// Maximum lifetime of a resource
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(300)), // 5 minutes
            max_lifetime: None,
        }
    }
}

/// Factory trait for creating and validating resources
#[async_trait::async_trait]
pub trait ResourceFactory<R: Send + 'static>: Send + Sync {
    /// Create a new resource for a destination
    async fn create(&self, destination: &Destination) -> Result<R, FactoryError>;

    /// Check if an idle resource is still usable before handing it out
    async fn is_healthy(&self, _resource: &R) -> bool {
        true
    }
}

/// Resource factory backed by an async closure
pub struct FnFactory<F> {
    create: F,
}

/// Build a [`ResourceFactory`] from an async closure
///
/// # Example
/// ```
/// use bulwark_core_resilience::{factory_fn, Destination, FactoryError};
///
/// let factory = factory_fn(|destination: Destination| async move {
///     Ok::<_, FactoryError>(format!("connection to {destination}"))
/// });
/// # let _ = factory;
/// ```
pub fn factory_fn<F>(create: F) -> FnFactory<F> {
    FnFactory { create }
}

#[async_trait::async_trait]
impl<R, F, Fut> ResourceFactory<R> for FnFactory<F>
where
    R: Send + 'static,
    F: Fn(Destination) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, FactoryError>> + Send,
{
    async fn create(&self, destination: &Destination) -> Result<R, FactoryError> {
        (self.create)(destination.clone()).await
    }
}

/// An idle resource waiting in the pool
struct IdleResource<R> {
    resource: R,
    created_at: Instant,
    idle_since: Instant,
}

impl<R> IdleResource<R> {
    fn is_expired(&self, config: &PoolConfig) -> bool {
        let idle_expired = config
            .idle_timeout
            .is_some_and(|timeout| self.idle_since.elapsed() > timeout);
        idle_expired || lifetime_expired(self.created_at, config)
    }
}

fn lifetime_expired(created_at: Instant, config: &PoolConfig) -> bool {
    config
        .max_lifetime
        .is_some_and(|lifetime| created_at.elapsed() > lifetime)
}

/// Mutable pool state for a single destination
struct PoolState<R> {
    /// Available resources, most recently released last
    idle: Vec<IdleResource<R>>,
    /// Resources held by callers or being created
    checked_out: usize,
}

/// What a caller holding a slot should do next
enum Checkout<R> {
    Reuse(IdleResource<R>),
    Create,
}

/// A checkout that has not produced a resource yet
///
/// Undone on drop unless kept, so an acquire abandoned during a health check
/// or factory call does not leak capacity.
struct Reservation<'a, R> {
    pool: &'a DestinationPool<R>,
    kept: bool,
}

impl<'a, R> Reservation<'a, R> {
    fn new(pool: &'a DestinationPool<R>) -> Self {
        Self { pool, kept: false }
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl<R> Drop for Reservation<'_, R> {
    fn drop(&mut self) {
        if !self.kept {
            self.pool.forget();
        }
    }
}

/// Pool state for a single destination
///
/// Each checked-out resource holds one permit of `slots`, and a new resource
/// is only created when nothing is idle, so `idle + checked_out` never
/// exceeds `max_size`.
struct DestinationPool<R> {
    destination: Destination,
    config: Arc<PoolConfig>,
    state: Mutex<PoolState<R>>,
    slots: Arc<Semaphore>,
}

impl<R> DestinationPool<R> {
    fn new(destination: Destination, config: Arc<PoolConfig>) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_size));
        Self {
            destination,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                checked_out: 0,
            }),
            slots,
        }
    }

    /// Check out the most recently returned idle resource, or reserve the
    /// right to create one. Expired idle resources are dropped first.
    fn checkout(&self) -> Checkout<R> {
        let mut state = self.state.lock();
        let (fresh, expired): (Vec<_>, Vec<_>) = state
            .idle
            .drain(..)
            .partition(|entry| !entry.is_expired(&self.config));
        state.idle = fresh;
        state.checked_out += 1;
        let next = state.idle.pop();
        drop(state);

        if !expired.is_empty() {
            debug!(
                destination = %self.destination,
                count = expired.len(),
                "discarding expired idle resources"
            );
        }

        match next {
            Some(idle) => Checkout::Reuse(idle),
            None => Checkout::Create,
        }
    }

    /// Forget a checked-out resource that will not come back
    fn forget(&self) {
        let mut state = self.state.lock();
        state.checked_out = state.checked_out.saturating_sub(1);
    }

    fn check_in(&self, resource: IdleResource<R>) {
        let mut state = self.state.lock();
        state.checked_out = state.checked_out.saturating_sub(1);
        state.idle.push(resource);
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            idle: state.idle.len(),
            checked_out: state.checked_out,
            max_size: self.config.max_size,
        }
    }
}

/// A resource checked out of the pool
///
/// Dereferences to the underlying resource. The guard owns one pool slot
/// until it is released, discarded or dropped.
pub struct PooledResource<R> {
    resource: Option<R>,
    created_at: Instant,
    pool: Arc<DestinationPool<R>>,
    _slot: OwnedSemaphorePermit,
}

impl<R> PooledResource<R> {
    /// Destination this resource belongs to
    pub fn destination(&self) -> &Destination {
        &self.pool.destination
    }

    /// Return the resource to the idle set of its destination
    ///
    /// A resource past its maximum lifetime is discarded instead.
    pub fn release(mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };

        if lifetime_expired(self.created_at, &self.pool.config) {
            debug!(destination = %self.pool.destination, "discarding resource past max lifetime");
            self.pool.forget();
            drop(resource);
            return;
        }

        self.pool.check_in(IdleResource {
            resource,
            created_at: self.created_at,
            idle_since: Instant::now(),
        });
    }

    /// Discard a resource that is no longer usable
    ///
    /// The slot is freed so the next acquire can create a fresh resource.
    pub fn discard(mut self) {
        if self.resource.take().is_some() {
            self.pool.forget();
            debug!(destination = %self.pool.destination, "discarding unusable resource");
        }
    }
}

impl<R> Deref for PooledResource<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource
            .as_ref()
            .expect("pooled resource is present until released")
    }
}

impl<R> DerefMut for PooledResource<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource
            .as_mut()
            .expect("pooled resource is present until released")
    }
}

impl<R> Drop for PooledResource<R> {
    fn drop(&mut self) {
        if self.resource.take().is_some() {
            self.pool.forget();
            debug!(
                destination = %self.pool.destination,
                "resource dropped without release, discarding"
            );
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for PooledResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("destination", &self.pool.destination)
            .field("resource", &self.resource)
            .finish()
    }
}

/// A resource pool partitioned by destination
///
/// # Example
/// ```no_run
/// use bulwark_core_resilience::{
///     Destination, FactoryError, PoolConfig, ResilienceError, ResourceFactory, ResourcePool,
/// };
/// use std::sync::Arc;
///
/// # #[derive(Debug)]
/// # struct MyConnection { id: usize }
/// struct MyConnectionFactory;
///
/// #[async_trait::async_trait]
/// impl ResourceFactory<MyConnection> for MyConnectionFactory {
///     async fn create(&self, _destination: &Destination) -> Result<MyConnection, FactoryError> {
///         Ok(MyConnection { id: 1 })
///     }
/// }
///
/// # async fn example() -> Result<(), ResilienceError> {
/// let pool = ResourcePool::new(Arc::new(MyConnectionFactory), PoolConfig::default());
///
/// // Acquire a connection
/// let conn = pool.acquire(&Destination::new("db")).await?;
/// // Use connection...
///
/// // Return connection to pool
/// conn.release();
/// # Ok(())
/// # }
/// ```
pub struct ResourcePool<R> {
    config: Arc<PoolConfig>,
    factory: Arc<dyn ResourceFactory<R>>,
    pools: Arc<DashMap<Destination, Arc<DestinationPool<R>>>>,
}

impl<R> Clone for ResourcePool<R> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            factory: Arc::clone(&self.factory),
            pools: Arc::clone(&self.pools),
        }
    }
}

impl<R: Send + 'static> ResourcePool<R> {
    /// Create a new resource pool
    pub fn new(factory: Arc<dyn ResourceFactory<R>>, config: PoolConfig) -> Self {
        Self {
            config: Arc::new(config),
            factory,
            pools: Arc::new(DashMap::new()),
        }
    }

    /// Create a resource pool with default configuration
    pub fn new_default(factory: Arc<dyn ResourceFactory<R>>) -> Self {
        Self::new(factory, PoolConfig::default())
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn destination_pool(&self, destination: &Destination) -> Arc<DestinationPool<R>> {
        if let Some(pool) = self.pools.get(destination) {
            return Arc::clone(pool.value());
        }

        self.pools
            .entry(destination.clone())
            .or_insert_with(|| {
                Arc::new(DestinationPool::new(
                    destination.clone(),
                    Arc::clone(&self.config),
                ))
            })
            .clone()
    }

    /// Acquire a resource for a destination
    ///
    /// Reuses the most recently released healthy idle resource. If none is
    /// idle and the destination is below `max_size`, a new one is created.
    /// Otherwise waits up to `acquire_timeout` for a release before failing
    /// with [`ResilienceError::PoolExhausted`]. Factory failures surface as
    /// [`ResilienceError::ResourceCreation`] and do not consume capacity.
    pub async fn acquire(
        &self,
        destination: &Destination,
    ) -> Result<PooledResource<R>, ResilienceError> {
        let pool = self.destination_pool(destination);
        let started = Instant::now();

        let slot = match tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&pool.slots).acquire_owned(),
        )
        .await
        {
            Ok(Ok(slot)) => slot,
            Ok(Err(_)) | Err(_) => {
                debug!(destination = %destination, "resource pool exhausted");
                return Err(ResilienceError::PoolExhausted {
                    destination: destination.clone(),
                    waited: started.elapsed(),
                });
            }
        };

        loop {
            let checkout = pool.checkout();
            let reservation = Reservation::new(&pool);

            match checkout {
                Checkout::Reuse(idle) => {
                    if self.factory.is_healthy(&idle.resource).await {
                        reservation.keep();
                        return Ok(PooledResource {
                            resource: Some(idle.resource),
                            created_at: idle.created_at,
                            pool,
                            _slot: slot,
                        });
                    }
                    debug!(destination = %destination, "discarding unhealthy idle resource");
                }
                Checkout::Create => {
                    return match self.factory.create(destination).await {
                        Ok(resource) => {
                            reservation.keep();
                            debug!(destination = %destination, "created new resource");
                            Ok(PooledResource {
                                resource: Some(resource),
                                created_at: Instant::now(),
                                pool,
                                _slot: slot,
                            })
                        }
                        Err(e) => {
                            warn!(destination = %destination, error = %e, "resource creation failed");
                            Err(ResilienceError::ResourceCreation {
                                destination: destination.clone(),
                                reason: e.to_string(),
                            })
                        }
                    };
                }
            }
        }
    }

    /// Return a resource to its pool; see [`PooledResource::release`]
    pub fn release(&self, resource: PooledResource<R>) {
        resource.release();
    }

    /// Get current pool statistics for a destination
    pub fn stats(&self, destination: &Destination) -> PoolStats {
        match self.pools.get(destination) {
            Some(pool) => pool.stats(),
            None => PoolStats {
                idle: 0,
                checked_out: 0,
                max_size: self.config.max_size,
            },
        }
    }

    /// Discard all idle resources of a destination
    pub fn clear_idle(&self, destination: &Destination) {
        if let Some(pool) = self.pools.get(destination) {
            let idle = std::mem::take(&mut pool.state.lock().idle);
            debug!(destination = %destination, count = idle.len(), "cleared idle resources");
        }
    }

    /// Destinations that have been used so far
    pub fn destinations(&self) -> Vec<Destination> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Pool statistics for one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of idle resources
    pub idle: usize,
    /// Number of checked-out resources, including ones being created
    pub checked_out: usize,
    /// Maximum pool size
    pub max_size: usize,
}

impl PoolStats {
    /// Total live resources
    pub fn total(&self) -> usize {
        self.idle + self.checked_out
    }

    /// Get pool utilization as a percentage
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.checked_out as f64 / self.max_size as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestConnection {
        id: usize,
        healthy: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct TestFactory {
        counter: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ResourceFactory<TestConnection> for TestFactory {
        async fn create(&self, _destination: &Destination) -> Result<TestConnection, FactoryError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err("connection refused".into());
            }
            let id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TestConnection {
                id,
                healthy: Arc::new(AtomicBool::new(true)),
            })
        }

        async fn is_healthy(&self, conn: &TestConnection) -> bool {
            conn.healthy.load(Ordering::SeqCst)
        }
    }

    fn pool(max_size: usize, factory: Arc<TestFactory>) -> ResourcePool<TestConnection> {
        ResourcePool::new(
            factory,
            PoolConfig {
                max_size,
                acquire_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_pool_acquire_release() {
        let pool = pool(5, Arc::new(TestFactory::default()));
        let db = Destination::new("db");

        let conn1 = pool.acquire(&db).await.unwrap();
        assert_eq!(conn1.id, 1);
        assert_eq!(conn1.destination(), &db);

        let stats = pool.stats(&db);
        assert_eq!(stats.checked_out, 1);
        assert_eq!(stats.idle, 0);

        pool.release(conn1);

        let stats = pool.stats(&db);
        assert_eq!(stats.checked_out, 0);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn test_pool_reuse_is_lifo() {
        let pool = pool(5, Arc::new(TestFactory::default()));
        let db = Destination::new("db");

        let conn1 = pool.acquire(&db).await.unwrap();
        let conn2 = pool.acquire(&db).await.unwrap();
        conn1.release();
        conn2.release();

        // Most recently released comes back first
        let conn = pool.acquire(&db).await.unwrap();
        assert_eq!(conn.id, 2);
    }

    #[tokio::test]
    async fn test_pool_max_size() {
        let pool = pool(2, Arc::new(TestFactory::default()));
        let db = Destination::new("db");

        let conn1 = pool.acquire(&db).await.unwrap();
        let conn2 = pool.acquire(&db).await.unwrap();

        // Try to acquire one more - should time out
        let result = pool.acquire(&db).await;
        assert!(matches!(result, Err(ResilienceError::PoolExhausted { .. })));

        conn1.release();
        let conn3 = pool.acquire(&db).await.unwrap();
        assert_eq!(conn3.id, 1);

        conn2.release();
        conn3.release();
        assert_eq!(pool.stats(&db).total(), 2);
    }

    #[tokio::test]
    async fn test_waiting_acquire_resumes_on_release() {
        let pool = ResourcePool::new(
            Arc::new(TestFactory::default()),
            PoolConfig {
                max_size: 1,
                acquire_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );
        let db = Destination::new("db");

        let conn = pool.acquire(&db).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            let db = db.clone();
            tokio::spawn(async move { pool.acquire(&db).await.map(|c| c.id) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        conn.release();
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_factory_failure_does_not_consume_capacity() {
        let factory = Arc::new(TestFactory::default());
        let pool = pool(1, Arc::clone(&factory));
        let db = Destination::new("db");

        factory.fail.store(true, Ordering::SeqCst);
        let result = pool.acquire(&db).await;
        assert!(matches!(
            result,
            Err(ResilienceError::ResourceCreation { ref reason, .. }) if reason == "connection refused"
        ));
        assert_eq!(pool.stats(&db).checked_out, 0);

        factory.fail.store(false, Ordering::SeqCst);
        assert!(pool.acquire(&db).await.is_ok());
    }

    #[tokio::test]
    async fn test_discard_allows_fresh_resource() {
        let pool = pool(1, Arc::new(TestFactory::default()));
        let db = Destination::new("db");

        let conn = pool.acquire(&db).await.unwrap();
        conn.discard();
        assert_eq!(pool.stats(&db).total(), 0);

        let conn = pool.acquire(&db).await.unwrap();
        assert_eq!(conn.id, 2);
    }

    #[tokio::test]
    async fn test_drop_without_release_discards() {
        let pool = pool(1, Arc::new(TestFactory::default()));
        let db = Destination::new("db");

        {
            let _conn = pool.acquire(&db).await.unwrap();
        }

        let stats = pool.stats(&db);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.checked_out, 0);
        assert_eq!(pool.acquire(&db).await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_unhealthy_idle_resource_is_replaced() {
        let pool = pool(2, Arc::new(TestFactory::default()));
        let db = Destination::new("db");

        let conn = pool.acquire(&db).await.unwrap();
        let healthy = Arc::clone(&conn.healthy);
        conn.release();
        healthy.store(false, Ordering::SeqCst);

        let conn = pool.acquire(&db).await.unwrap();
        assert_eq!(conn.id, 2);
        assert_eq!(pool.stats(&db).idle, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_expires_resources() {
        let pool = ResourcePool::new(
            Arc::new(TestFactory::default()),
            PoolConfig {
                max_size: 2,
                idle_timeout: Some(Duration::from_secs(10)),
                max_lifetime: None,
                ..Default::default()
            },
        );
        let db = Destination::new("db");

        pool.acquire(&db).await.unwrap().release();
        tokio::time::advance(Duration::from_secs(11)).await;

        let conn = pool.acquire(&db).await.unwrap();
        assert_eq!(conn.id, 2);
    }

    #[tokio::test]
    async fn test_destinations_are_isolated() {
        let pool = pool(1, Arc::new(TestFactory::default()));
        let db = Destination::new("db");
        let api = Destination::new("api");

        let _db_conn = pool.acquire(&db).await.unwrap();
        let api_conn = pool.acquire(&api).await;
        assert!(api_conn.is_ok());

        let mut destinations = pool.destinations();
        destinations.sort();
        assert_eq!(destinations, vec![api, db]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_resource_shared_under_contention() {
        let factory = Arc::new(TestFactory::default());
        let pool = ResourcePool::new(
            Arc::clone(&factory) as Arc<dyn ResourceFactory<TestConnection>>,
            PoolConfig {
                max_size: 3,
                acquire_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );
        let db = Destination::new("db");
        let held = Arc::new(Mutex::new(HashSet::new()));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let pool = pool.clone();
                let db = db.clone();
                let held = Arc::clone(&held);
                tokio::spawn(async move {
                    let conn = pool.acquire(&db).await.unwrap();
                    assert!(held.lock().insert(conn.id), "resource handed out twice");
                    assert!(pool.stats(&db).total() <= 3);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    held.lock().remove(&conn.id);
                    conn.release();
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        assert!(factory.counter.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_acquire_frees_capacity() {
        let factory = factory_fn(|_destination: Destination| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, FactoryError>(0u32)
        });
        let pool: ResourcePool<u32> = ResourcePool::new(
            Arc::new(factory),
            PoolConfig {
                max_size: 1,
                ..Default::default()
            },
        );
        let db = Destination::new("db");

        let abandoned = tokio::time::timeout(Duration::from_millis(10), pool.acquire(&db)).await;
        assert!(abandoned.is_err());

        let stats = pool.stats(&db);
        assert_eq!(stats.checked_out, 0);
        assert_eq!(stats.total(), 0);
    }
}
