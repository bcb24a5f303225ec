//! Recognition plug-in
//!
//! Template matching and text recognition are delegated to a dynamic library exposing
//! two C-ABI functions:
//!
//! ```c
//! typedef struct { float x; float y; float confidence; } AnnotationMatch;
//!
//! int annotation_match_template(const uint8_t *region, uint32_t width, uint32_t height,
//!                               const uint8_t *templ, uint32_t templ_width,
//!                               uint32_t templ_height, AnnotationMatch *out);
//!
//! int annotation_recognize_text(const uint8_t *region, uint32_t width, uint32_t height,
//!                               const char *whitelist, char *out, size_t out_len);
//! ```
//!
//! Images are 8-bit greyscale, row-major, without padding. Both functions return 0 on
//! success; the recognised text is written NUL-terminated into `out`.
//!
//! One loaded plug-in is shared by every worker thread. Calls into it are serialised, so
//! the library does not have to be reentrant.

use annotation_engine::{CharsetHint, MatchLocation, TemplateMatcher, TextRecognizer};
use image::GrayImage;
use libloading::Library;
use std::ffi::{c_char, c_int, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

const MATCH_SYMBOL: &[u8] = b"annotation_match_template\0";
const RECOGNIZE_SYMBOL: &[u8] = b"annotation_recognize_text\0";

/// Capacity of the text buffer handed to the recogniser
const TEXT_CAPACITY: usize = 4096;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Failed to load plug-in {path:?}: {source}")]
    Load {
        path: PathBuf,
        source: libloading::Error,
    },

    #[error("Plug-in {path:?} does not export '{symbol}': {source}")]
    MissingSymbol {
        path: PathBuf,
        symbol: &'static str,
        source: libloading::Error,
    },
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct RawMatch {
    x: f32,
    y: f32,
    confidence: f32,
}

type MatchFn = unsafe extern "C" fn(
    region: *const u8,
    width: u32,
    height: u32,
    template: *const u8,
    template_width: u32,
    template_height: u32,
    out: *mut RawMatch,
) -> c_int;

type RecognizeFn = unsafe extern "C" fn(
    region: *const u8,
    width: u32,
    height: u32,
    whitelist: *const c_char,
    out: *mut c_char,
    out_len: usize,
) -> c_int;

/// A loaded recognition library
pub struct Plugin {
    path: PathBuf,
    match_fn: MatchFn,
    recognize_fn: RecognizeFn,
    /// Held for the duration of every call into the library
    calls: Mutex<()>,
    // Keeps the functions above mapped
    _library: Library,
}

impl Plugin {
    /// Loads the library and resolves both entry points
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        log::info!("Loading recognition plug-in: {:?}", path);
        // SAFETY: loading runs the library's initialisers; the plug-in is trusted input
        let library = unsafe { Library::new(path) }.map_err(|source| PluginError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let missing = |symbol: &'static str| {
            let path = path.to_path_buf();
            move |source: libloading::Error| PluginError::MissingSymbol {
                path,
                symbol,
                source,
            }
        };
        // SAFETY: the symbols are declared with the signatures documented above
        let match_fn = unsafe { library.get::<MatchFn>(MATCH_SYMBOL) }
            .map(|symbol| *symbol)
            .map_err(missing("annotation_match_template"))?;
        let recognize_fn = unsafe { library.get::<RecognizeFn>(RECOGNIZE_SYMBOL) }
            .map(|symbol| *symbol)
            .map_err(missing("annotation_recognize_text"))?;

        Ok(Self {
            path: path.to_path_buf(),
            match_fn,
            recognize_fn,
            calls: Mutex::new(()),
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn match_template(&self, region: &GrayImage, template: &GrayImage) -> Option<MatchLocation> {
        let mut out = RawMatch::default();
        let _guard = self.exclusive();
        // SAFETY: both buffers hold width * height bytes and outlive the call
        let status = unsafe {
            (self.match_fn)(
                region.as_raw().as_ptr(),
                region.width(),
                region.height(),
                template.as_raw().as_ptr(),
                template.width(),
                template.height(),
                &mut out,
            )
        };
        if status != 0 {
            log::warn!("Plug-in template match failed with status {}", status);
            return None;
        }
        Some(MatchLocation {
            x: out.x,
            y: out.y,
            confidence: out.confidence,
        })
    }

    fn recognize(&self, region: &GrayImage, hint: CharsetHint) -> Option<String> {
        let whitelist = CString::new(hint.whitelist()).ok()?;
        let mut buffer = vec![0 as c_char; TEXT_CAPACITY];
        let _guard = self.exclusive();
        // SAFETY: the region holds width * height bytes, the whitelist is NUL-terminated
        // and the output buffer is TEXT_CAPACITY long
        let status = unsafe {
            (self.recognize_fn)(
                region.as_raw().as_ptr(),
                region.width(),
                region.height(),
                whitelist.as_ptr(),
                buffer.as_mut_ptr(),
                buffer.len(),
            )
        };
        if status != 0 {
            log::warn!("Plug-in text recognition failed with status {}", status);
            return None;
        }
        // Force termination in case the plug-in filled the whole buffer
        if let Some(last) = buffer.last_mut() {
            *last = 0;
        }
        // SAFETY: the buffer is NUL-terminated
        let text = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        Some(text.to_string_lossy().into_owned())
    }
}

/// Template matcher backed by a shared plug-in
pub struct PluginMatcher(pub Arc<Plugin>);

impl TemplateMatcher for PluginMatcher {
    fn match_template(&mut self, region: &GrayImage, template: &GrayImage) -> MatchLocation {
        self.0
            .match_template(region, template)
            .unwrap_or(MatchLocation {
                x: 0.0,
                y: 0.0,
                confidence: 0.0,
            })
    }
}

/// Text recogniser backed by a shared plug-in
pub struct PluginRecognizer(pub Arc<Plugin>);

impl TextRecognizer for PluginRecognizer {
    fn recognize(&mut self, region: &GrayImage, hint: CharsetHint) -> String {
        self.0.recognize(region, hint).unwrap_or_default()
    }
}
