use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::Device;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use shopmind::generation::NextTokenLogits;
use shopmind::search::{SemanticSearchEngine, TextEmbedder};
use shopmind::suggest::{
    KeywordExtractor, SuggestCache, SuggestError, SuggestParams, SuggestionEngine,
};
use shopmind::{ItemDescLm, device_label};

pub type SearchEngine = SemanticSearchEngine<Box<dyn TextEmbedder>>;

/// Builds a suggestion engine from a checkpoint path. Used at startup and by `/reload`.
pub trait EngineLoader<M>: Send + Sync + 'static {
    fn load(&self, path: &Path) -> Result<SuggestionEngine<M>, SuggestError>;
}

/// Loads [`ItemDescLm`] checkpoints onto a fixed device, sharing one segmenter.
pub struct CheckpointLoader {
    device: Device,
    keywords: Arc<KeywordExtractor>,
}

impl CheckpointLoader {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            keywords: Arc::new(KeywordExtractor::new()),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl EngineLoader<ItemDescLm> for CheckpointLoader {
    fn load(&self, path: &Path) -> Result<SuggestionEngine<ItemDescLm>, SuggestError> {
        SuggestionEngine::load_with(path, &self.device, Arc::clone(&self.keywords))
    }
}

pub struct HandlerState<M = ItemDescLm> {
    /// `None` until a model loads; handlers answer 503 meanwhile.
    pub engine: Arc<RwLock<Option<Arc<SuggestionEngine<M>>>>>,

    pub loader: Arc<dyn EngineLoader<M>>,

    pub search: Option<Arc<SearchEngine>>,

    pub cache: SuggestCache,

    pub model_path: PathBuf,

    pub device: &'static str,

    pub api_token: Option<Arc<str>>,

    rng: Arc<Mutex<StdRng>>,
}

impl<M> Clone for HandlerState<M> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            loader: Arc::clone(&self.loader),
            search: self.search.clone(),
            cache: self.cache.clone(),
            model_path: self.model_path.clone(),
            device: self.device,
            api_token: self.api_token.clone(),
            rng: Arc::clone(&self.rng),
        }
    }
}

impl<M> HandlerState<M>
where
    M: NextTokenLogits + Send + Sync + 'static,
{
    pub fn new(
        loader: Arc<dyn EngineLoader<M>>,
        model_path: PathBuf,
        device: &Device,
        cache: SuggestCache,
    ) -> Self {
        Self {
            engine: Arc::new(RwLock::new(None)),
            loader,
            search: None,
            cache,
            model_path,
            device: device_label(device),
            api_token: None,
            rng: Arc::new(Mutex::new(StdRng::from_os_rng())),
        }
    }

    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.map(Arc::from);
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        if let Some(seed) = seed {
            self.rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        }
        self
    }

    pub fn with_search(mut self, search: SearchEngine) -> Self {
        self.search = Some(Arc::new(search));
        self
    }

    pub fn with_engine(self, engine: SuggestionEngine<M>) -> Self {
        *self.engine.write() = Some(Arc::new(engine));
        self
    }

    pub fn engine(&self) -> Option<Arc<SuggestionEngine<M>>> {
        self.engine.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.engine.read().is_some()
    }

    /// Caches `suggestions` only while `served_by` is still the active engine.
    ///
    /// The read guard is held across the insert, so a concurrent [`Self::reload`]
    /// either swaps first (and the write is dropped) or clears after it.
    pub fn cache_if_current(
        &self,
        served_by: &Arc<SuggestionEngine<M>>,
        query: &str,
        params: &SuggestParams,
        suggestions: Arc<Vec<String>>,
    ) -> bool {
        let current = self.engine.read();
        match current.as_ref() {
            Some(engine) if Arc::ptr_eq(engine, served_by) => {
                self.cache.insert(query, params, suggestions);
                true
            }
            _ => false,
        }
    }

    /// Loads the model from `model_path`, swaps it in and clears cached responses.
    /// The previous engine stays active when loading fails.
    pub fn reload(&self) -> Result<(), SuggestError> {
        let engine = self.loader.load(&self.model_path)?;
        *self.engine.write() = Some(Arc::new(engine));
        self.cache.clear();
        Ok(())
    }

    /// Independent generator for one request, derived from the shared one.
    pub fn request_rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.rng.lock().random())
    }
}
