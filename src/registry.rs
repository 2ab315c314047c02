//! `SessionRegistry`: the process-wide owner of every live `PlayerSession`
//! and the global policies that span sessions (§4.8).
//!
//! Grounded on the teacher's `audio::thread` single-owner loop: exactly
//! one component holds the collection being mutated, every other part of
//! the crate reaches it through keyed lookups rather than its own
//! reference. Insertion-order enumeration is kept the same way
//! `TrackList` keeps `order` beside `by_id` — a parallel `Vec<SessionKey>`
//! next to the lookup map, rather than pulling in an order-preserving map
//! crate the teacher doesn't depend on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;

use crate::apparmor::{AppContextResolver, UriAuthorizer};
use crate::engine::Engine;
use crate::error::{CoreError, NotFoundKind};
use crate::ids::{SessionKey, SessionUuid};
use crate::output_observer::OutputState;
use crate::power::{PowerArbiter, PowerBackend};
use crate::session::PlayerSession;
use crate::types::Lifetime;

/// Builds a fresh `Engine` instance per session. A real binary wires this
/// to whatever constructs a new pipeline (one GStreamer pipeline per
/// session); `src/testing.rs` wires it to `StubEngine::new`.
pub trait EngineFactory<E: Engine>: Send + Sync + 'static {
    fn create(&self) -> E;
}

impl<E: Engine, F: Fn() -> E + Send + Sync + 'static> EngineFactory<E> for F {
    fn create(&self) -> E {
        (self)()
    }
}

pub struct SessionRegistry<E: Engine, B: PowerBackend, R: AppContextResolver> {
    by_key: HashMap<SessionKey, PlayerSession<E, B>>,
    by_uuid: HashMap<SessionUuid, SessionKey>,
    order: Vec<SessionKey>,
    current_player: Option<SessionKey>,
    /// Keys paused by `off_hook`, to be resumed (policy permitting) on the
    /// matching `on_hook`.
    paused_for_call: HashSet<SessionKey>,
    /// The dispatcher keeps this current as `OutputObserver` events arrive;
    /// `handle_on_hook`'s earpiece exception reads it instead of the
    /// registry depending on `OutputObserver` itself.
    last_known_output_state: OutputState,

    /// Not a trait object: `AppContextResolver::resolve` returns an opaque
    /// future (RPITIT), so it isn't object-safe — the same reason `Engine`
    /// and `PowerBackend` are generic parameters rather than `dyn`.
    context_resolver: Arc<R>,
    authorizer: Arc<dyn UriAuthorizer>,
    power: PowerArbiter<B>,
    engine_factory: Box<dyn EngineFactory<E>>,
}

impl<E: Engine, B: PowerBackend, R: AppContextResolver> SessionRegistry<E, B, R> {
    pub fn new(
        context_resolver: Arc<R>,
        authorizer: Arc<dyn UriAuthorizer>,
        power: PowerArbiter<B>,
        engine_factory: impl EngineFactory<E>,
    ) -> Self {
        SessionRegistry {
            by_key: HashMap::new(),
            by_uuid: HashMap::new(),
            order: Vec::new(),
            current_player: None,
            paused_for_call: HashSet::new(),
            last_known_output_state: OutputState::Speaker,
            context_resolver,
            authorizer,
            power,
            engine_factory: Box::new(engine_factory),
        }
    }

    // ---- lifecycle ----

    /// Resolves `owner_peer`'s confinement context, allocates a key and
    /// uuid, and constructs the session. `ContextUnresolvable` is treated
    /// as denial (§4.4).
    pub async fn create_session(
        &mut self,
        owner_peer: String,
    ) -> Result<(SessionKey, SessionUuid), CoreError> {
        let identity = self
            .context_resolver
            .resolve(&owner_peer)
            .await
            .ok_or_else(|| {
                CoreError::Authorization("confinement context could not be resolved".to_string())
            })?;

        let key = SessionKey::next();
        let uuid = SessionUuid::generate();
        let engine = self.engine_factory.create();
        let session = PlayerSession::new(
            key,
            uuid.clone(),
            owner_peer,
            identity,
            engine,
            self.power.clone(),
            self.authorizer.clone(),
        );

        self.by_key.insert(key, session);
        self.by_uuid.insert(uuid.clone(), key);
        self.order.push(key);
        Ok((key, uuid))
    }

    /// Synchronous under the dispatcher's own serialization — there is no
    /// separate lock here because every mutation already happens on the
    /// single logical dispatcher (§5).
    pub fn destroy_session(&mut self, uuid: &SessionUuid) -> Result<(), CoreError> {
        let key = self
            .by_uuid
            .remove(uuid)
            .ok_or(CoreError::NotFound(NotFoundKind::Session))?;
        if self.current_player == Some(key) {
            warn!(session = %key, "destroying session while it is still the current player");
            self.current_player = None;
        }
        self.by_key.remove(&key);
        self.order.retain(|k| *k != key);
        self.paused_for_call.remove(&key);
        Ok(())
    }

    pub fn reattach_session(&self, uuid: &SessionUuid) -> Result<SessionKey, CoreError> {
        self.by_uuid
            .get(uuid)
            .copied()
            .ok_or(CoreError::NotFound(NotFoundKind::Session))
    }

    pub fn get(&self, key: SessionKey) -> Option<&PlayerSession<E, B>> {
        self.by_key.get(&key)
    }

    pub fn get_mut(&mut self, key: SessionKey) -> Option<&mut PlayerSession<E, B>> {
        self.by_key.get_mut(&key)
    }

    pub fn key_for_uuid(&self, uuid: &SessionUuid) -> Option<SessionKey> {
        self.by_uuid.get(uuid).copied()
    }

    /// Enumeration in insertion order (§4.8).
    pub fn keys(&self) -> &[SessionKey] {
        &self.order
    }

    // ---- current player ----

    pub fn set_current_player(&mut self, key: SessionKey) {
        self.current_player = Some(key);
    }

    pub fn reset_current_player(&mut self) {
        self.current_player = None;
    }

    pub fn is_current_player(&self, key: SessionKey) -> bool {
        self.current_player == Some(key)
    }

    pub fn current_player(&self) -> Option<SessionKey> {
        self.current_player
    }

    pub fn last_known_output_state(&self) -> OutputState {
        self.last_known_output_state
    }

    pub fn set_last_known_output_state(&mut self, state: OutputState) {
        self.last_known_output_state = state;
    }

    // ---- multimedia exclusivity ----

    /// The full spec operation: if `key`'s role is `multimedia`, pause
    /// every other playing multimedia session and claim the current-player
    /// slot, then ask the session itself to start playing. Sessions in
    /// other roles just play.
    pub async fn play(&mut self, key: SessionKey) -> Result<(), CoreError> {
        let role = self
            .by_key
            .get(&key)
            .ok_or(CoreError::NotFound(NotFoundKind::Session))?
            .audio_role();

        if role.is_multimedia() {
            self.pause_other_multimedia_sessions(key).await;
            self.current_player = Some(key);
        }

        let session = self
            .by_key
            .get_mut(&key)
            .ok_or(CoreError::NotFound(NotFoundKind::Session))?;
        session.play().await
    }

    pub async fn pause_other_multimedia_sessions_pub(&mut self, except: SessionKey) {
        self.pause_other_multimedia_sessions(except).await;
    }

    async fn pause_other_multimedia_sessions(&mut self, except: SessionKey) {
        let candidates: Vec<SessionKey> = self
            .order
            .iter()
            .copied()
            .filter(|k| *k != except)
            .filter(|k| {
                self.by_key
                    .get(k)
                    .is_some_and(|s| s.audio_role().is_multimedia() && s.playback_status().is_playing())
            })
            .collect();
        for k in candidates {
            if let Some(session) = self.by_key.get_mut(&k) {
                if let Err(err) = session.pause().await {
                    warn!(%err, session = %k, "exclusivity pause failed");
                }
            }
        }
    }

    // ---- call interaction ----

    /// Pauses every currently-playing session and remembers which ones,
    /// so the matching `on_hook` can resume exactly those.
    pub async fn handle_off_hook(&mut self) {
        self.paused_for_call.clear();
        let playing: Vec<SessionKey> = self
            .order
            .iter()
            .copied()
            .filter(|k| self.by_key.get(k).is_some_and(|s| s.playback_status().is_playing()))
            .collect();
        for k in playing {
            self.paused_for_call.insert(k);
            if let Some(session) = self.by_key.get_mut(&k) {
                if let Err(err) = session.pause().await {
                    warn!(%err, session = %k, "call-preemption pause failed");
                }
            }
        }
    }

    /// Resumes sessions paused by `off_hook`, except a video session when
    /// the route is `earpiece` (§4.3, §4.7).
    pub async fn handle_on_hook(&mut self, output_state: OutputState) {
        let keys: Vec<SessionKey> = self.paused_for_call.drain().collect();
        for k in keys {
            let Some(session) = self.by_key.get(&k) else {
                continue;
            };
            let is_video = session.is_video_source().await;
            if matches!(output_state, OutputState::Earpiece) && is_video {
                continue;
            }
            if let Some(session) = self.by_key.get_mut(&k) {
                if let Err(err) = session.play().await {
                    warn!(%err, session = %k, "call-preemption resume failed");
                }
            }
        }
    }

    // ---- disconnection ----

    /// Releases the session's wakelocks and track list, clears the
    /// current-player slot if it pointed at this session, and destroys
    /// the session unless its lifetime is `resumable`.
    pub async fn handle_client_disconnected(&mut self, key: SessionKey) {
        let Some(session) = self.by_key.get_mut(&key) else {
            return;
        };
        session.handle_client_disconnected().await;

        if self.current_player == Some(key) {
            self.current_player = None;
        }

        let lifetime = self.by_key.get(&key).map(|s| s.lifetime());
        if lifetime != Some(Lifetime::Resumable) {
            if let Some(uuid) = self.by_key.get(&key).map(|s| s.uuid().clone()) {
                let _ = self.destroy_session(&uuid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apparmor::DefaultUriAuthorizer;
    use crate::engine::{EngineEvent, EngineState};
    use crate::testing::{StubAppContextResolver, StubEngine, StubPowerBackend};
    use crate::types::AudioStreamRole;

    fn fresh_registry(
    ) -> SessionRegistry<Arc<StubEngine>, Arc<StubPowerBackend>, StubAppContextResolver> {
        SessionRegistry::new(
            Arc::new(StubAppContextResolver::unconfined()),
            Arc::new(DefaultUriAuthorizer::new(vec![])),
            PowerArbiter::new(StubPowerBackend::new()),
            || StubEngine::new(),
        )
    }

    async fn start_playing<E: Engine, B: PowerBackend, R: AppContextResolver>(
        registry: &mut SessionRegistry<E, B, R>,
        key: SessionKey,
    ) {
        registry.get_mut(key).unwrap().handle_engine_event(EngineEvent::PlaybackStatusChanged(EngineState::Playing)).await;
    }

    #[tokio::test]
    async fn s1_multimedia_exclusivity() {
        let mut registry = fresh_registry();
        let (a, _) = registry.create_session("peer-a".into()).await.unwrap();
        let (b, _) = registry.create_session("peer-b".into()).await.unwrap();
        let (c, _) = registry.create_session("peer-c".into()).await.unwrap();
        registry.get_mut(c).unwrap().set_audio_role(AudioStreamRole::Alert);

        registry.play(a).await.unwrap();
        start_playing(&mut registry, a).await;

        registry.play(b).await.unwrap();
        start_playing(&mut registry, b).await;

        registry.play(c).await.unwrap();
        start_playing(&mut registry, c).await;

        assert!(!registry.get(a).unwrap().playback_status().is_playing());
        assert!(registry.get(b).unwrap().playback_status().is_playing());
        assert!(registry.get(c).unwrap().playback_status().is_playing());
        assert_eq!(registry.current_player(), Some(b));
    }

    #[tokio::test]
    async fn s7_call_preemption_resumes_on_speaker_route() {
        let mut registry = fresh_registry();
        let (a, _) = registry.create_session("peer-a".into()).await.unwrap();
        let (b, _) = registry.create_session("peer-b".into()).await.unwrap();
        start_playing(&mut registry, a).await;
        start_playing(&mut registry, b).await;

        registry.handle_off_hook().await;
        assert!(!registry.get(a).unwrap().playback_status().is_playing());
        assert!(!registry.get(b).unwrap().playback_status().is_playing());

        registry.handle_on_hook(OutputState::Speaker).await;
        start_playing(&mut registry, a).await;
        start_playing(&mut registry, b).await;
        assert!(registry.get(a).unwrap().playback_status().is_playing());
        assert!(registry.get(b).unwrap().playback_status().is_playing());
    }

    #[tokio::test]
    async fn s7_video_session_stays_paused_on_earpiece_route() {
        let engine = StubEngine::new();
        engine.set_video_source(true);
        let mut registry = SessionRegistry::new(
            Arc::new(StubAppContextResolver::unconfined()),
            Arc::new(DefaultUriAuthorizer::new(vec![])),
            PowerArbiter::new(StubPowerBackend::new()),
            {
                let engine = engine.clone();
                move || engine.clone()
            },
        );
        let (a, _) = registry.create_session("peer-a".into()).await.unwrap();
        start_playing(&mut registry, a).await;

        registry.handle_off_hook().await;
        assert!(!registry.get(a).unwrap().playback_status().is_playing());

        registry.handle_on_hook(OutputState::Earpiece).await;
        assert!(!registry.get(a).unwrap().playback_status().is_playing());
    }

    #[tokio::test]
    async fn destroying_current_player_clears_the_slot() {
        let mut registry = fresh_registry();
        let (a, uuid) = registry.create_session("peer-a".into()).await.unwrap();
        registry.set_current_player(a);
        registry.destroy_session(&uuid).unwrap();
        assert_eq!(registry.current_player(), None);
    }

    #[tokio::test]
    async fn destroying_session_removes_its_embedded_art_files() {
        // Mirrors `main.rs`'s real wiring: a fresh `StubEngine` per
        // session, captured here only so the test can reach in and assert
        // on its art cache directly.
        let spawned: Arc<std::sync::Mutex<Vec<Arc<StubEngine>>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = SessionRegistry::new(
            Arc::new(StubAppContextResolver::unconfined()),
            Arc::new(DefaultUriAuthorizer::new(vec![])),
            PowerArbiter::new(StubPowerBackend::new()),
            {
                let spawned = spawned.clone();
                move || {
                    let engine = StubEngine::new();
                    spawned.lock().unwrap().push(engine.clone());
                    engine
                }
            },
        );

        let (_, uuid) = registry.create_session("peer-a".into()).await.unwrap();
        let engine = spawned.lock().unwrap()[0].clone();
        let art_path = engine.ingest_embedded_art("track://a", b"cover-bytes").unwrap();
        assert!(art_path.exists());
        assert_eq!(engine.live_art_file_count(), 1);
        drop(engine);

        registry.destroy_session(&uuid).unwrap();
        spawned.lock().unwrap().clear();
        assert!(!art_path.exists());
    }

    #[tokio::test]
    async fn enumeration_is_insertion_order() {
        let mut registry = fresh_registry();
        let (a, _) = registry.create_session("peer-a".into()).await.unwrap();
        let (b, _) = registry.create_session("peer-b".into()).await.unwrap();
        let (c, _) = registry.create_session("peer-c".into()).await.unwrap();
        assert_eq!(registry.keys(), &[a, b, c]);
    }
}
