use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time;

use anyhow::{anyhow, bail, Context, Result};
use show_image::{create_window, event, ImageInfo, ImageView, WindowOptions};
use threadpool::ThreadPool;

use nalgebra as na;
use na::{vector, Matrix4, Vector3};

use crate::scene::camera::{viewport, Camera};
use crate::scene::model::Model;
use crate::scene::shader::{DrawContext, NormalMapShader};
use crate::scene::{draw_model, FrameBuffer, RenderStats};

/// Everything a render run needs, filled from command line flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub width: u32,
    pub height: u32,
    pub models: Vec<PathBuf>,
    pub output: PathBuf,
    pub depth_output: Option<PathBuf>,
    pub light_direction: Vector3<f32>,
    pub eye: Vector3<f32>,
    pub center: Vector3<f32>,
    pub up: Vector3<f32>,
    pub threads: Option<usize>,
    pub show_window: bool,
}

impl Default for Params {
    fn default() -> Self {
        return Self {
            width: 800,
            height: 800,
            models: Vec::new(),
            output: PathBuf::from("framebuffer.png"),
            depth_output: None,
            light_direction: vector![1.0, 1.0, 1.0],
            eye: vector![1.0, 1.0, 3.0],
            center: vector![0.0, 0.0, 0.0],
            up: vector![0.0, 1.0, 0.0],
            threads: None,
            show_window: false,
        };
    }
}

/// Shorter directions are treated as zero.
const MIN_LENGTH: f32 = 1e-6;

pub const USAGE: &str = "usage: tangent_renderer [-o out.png] [-z depth.png] [-W width] [-H height] \
[-l x,y,z] [-e x,y,z] [-c x,y,z] [-u x,y,z] [-j threads] [-w] model.obj...";

impl Params {
    /// Parses flags, the first element is expected to be the program name.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut params = Params::default();
        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            // Value of the flag, if it takes one.
            let value = || {
                args.get(i + 1)
                    .map(|s| s.as_str())
                    .ok_or_else(|| anyhow!("flag {} needs a value", flag))
            };
            match flag {
                "-o" => params.output = PathBuf::from(value()?),
                "-z" => params.depth_output = Some(PathBuf::from(value()?)),
                "-W" => params.width = parse_size(value()?).context("bad width")?,
                "-H" => params.height = parse_size(value()?).context("bad height")?,
                "-l" => params.light_direction = parse_vector(value()?).context("bad light direction")?,
                "-e" => params.eye = parse_vector(value()?).context("bad eye position")?,
                "-c" => params.center = parse_vector(value()?).context("bad center position")?,
                "-u" => params.up = parse_vector(value()?).context("bad up direction")?,
                "-j" => params.threads = Some(parse_size(value()?).context("bad thread count")? as usize),
                "-w" => {
                    params.show_window = true;
                    i += 1;
                    continue;
                }
                _ if flag.starts_with('-') => bail!("unknown flag {}", flag),
                _ => {
                    params.models.push(PathBuf::from(flag));
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }

        if params.models.is_empty() {
            bail!("no model given");
        }
        let pixel_bytes = params.width.checked_mul(params.height).and_then(|n| n.checked_mul(3));
        if pixel_bytes.is_none() {
            bail!("frame of {}x{} is too large", params.width, params.height);
        }
        if params.light_direction.norm() < MIN_LENGTH {
            bail!("light direction is zero");
        }
        let forward = params.center - params.eye;
        if forward.norm() < MIN_LENGTH {
            bail!("eye and center coincide");
        }
        if params.up.norm() < MIN_LENGTH || params.up.normalize().cross(&forward.normalize()).norm() < MIN_LENGTH {
            bail!("up direction is zero or parallel to the view direction");
        }
        return Ok(params);
    }
}

fn parse_size(s: &str) -> Result<u32> {
    let value: u32 = s.parse().with_context(|| format!("'{}' is not a number", s))?;
    if value == 0 {
        bail!("value must be positive");
    }
    return Ok(value);
}

/// Parses "x,y,z".
fn parse_vector(s: &str) -> Result<Vector3<f32>> {
    let parts = s
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<Vec<f32>, _>>()
        .with_context(|| format!("'{}' is not a list of numbers", s))?;
    if parts.len() != 3 {
        bail!("'{}' has {} components, expected 3", s, parts.len());
    }
    if !parts.iter().all(|x| x.is_finite()) {
        bail!("'{}' has non-finite components", s);
    }
    return Ok(vector![parts[0], parts[1], parts[2]]);
}

/// Loads a model and draws it into its own frame buffer.
fn render_model(path: &Path, context: &DrawContext, viewport: &Matrix4<f32>, width: u32, height: u32) -> Result<(FrameBuffer, RenderStats)> {
    let model = Model::load(path)?;
    let shader = NormalMapShader::new(&model, context);
    let mut frame = FrameBuffer::new(width, height);

    let time_begin = time::Instant::now();
    let stats = draw_model(&shader, model.n_faces(), viewport, &mut frame);
    log::info!(
        "{}: {} triangles, {} pixels in {:.1} ms",
        path.display(),
        stats.triangles,
        stats.pixels,
        time_begin.elapsed().as_secs_f32() * 1000.0
    );
    if stats.failed_fragments > 0 {
        log::warn!(
            "{}: {} fragments not shaded because of degenerate triangles or uv mapping",
            path.display(),
            stats.failed_fragments
        );
    }
    if stats.skipped_triangles > 0 {
        log::debug!(
            "{}: {} triangles are behind the camera or have no area on screen",
            path.display(),
            stats.skipped_triangles
        );
    }
    return Ok((frame, stats));
}

/// Renders every model on a worker of its own and composes the results in model order.
pub fn render(params: &Params) -> Result<(FrameBuffer, RenderStats)> {
    let camera = Camera::new(params.eye, params.center, params.up);
    let context = Arc::new(DrawContext::new(camera.view_matrix(), camera.projection_matrix(), params.light_direction)?);
    let (w, h) = (params.width as f32, params.height as f32);
    let viewport = viewport(w / 8.0, h / 8.0, w * 3.0 / 4.0, h * 3.0 / 4.0);

    let threads = params.threads.unwrap_or(params.models.len()).max(1);
    let pool = ThreadPool::new(threads);
    let (sender, receiver) = mpsc::channel();
    for (index, path) in params.models.iter().enumerate() {
        let sender = sender.clone();
        let context = Arc::clone(&context);
        let path = path.clone();
        let (width, height) = (params.width, params.height);
        pool.execute(move || {
            let result = render_model(&path, &context, &viewport, width, height)
                .with_context(|| format!("failed to render {}", path.display()));
            // Receiver outlives the pool, send can't fail.
            let _ = sender.send((index, result));
        });
    }
    drop(sender);

    let mut results: Vec<_> = receiver.iter().collect();
    if results.len() != params.models.len() {
        bail!("{} of {} render jobs didn't finish", params.models.len() - results.len(), params.models.len());
    }
    results.sort_by_key(|(index, _)| *index);

    let mut frame = FrameBuffer::new(params.width, params.height);
    let mut stats = RenderStats::default();
    for (_, result) in results {
        let (model_frame, model_stats) = result?;
        frame.merge(&model_frame);
        stats.add(model_stats);
    }
    return Ok((frame, stats));
}

/// Helper, defining exit event to be an Escape key press.
fn is_exit_event(window_event: event::WindowEvent) -> bool {
    if let event::WindowEvent::KeyboardInput(event) = window_event {
        if event.input.key_code == Some(event::VirtualKeyCode::Escape) && event.input.state.is_released() {
            return true;
        }
    }
    return false;
}

/// Shows the image until the window gets closed or Escape is pressed.
fn show(params: &Params, frame: &FrameBuffer) -> Result<()> {
    let window_options = WindowOptions {
        size: Some([params.width, params.height]),
        ..Default::default()
    };
    let window = create_window("output", window_options).map_err(|e| anyhow!("failed to create window: {}", e))?;
    let image = frame.to_image();
    let image_view = ImageView::new(ImageInfo::rgb8(params.width, params.height), image.as_raw());
    window.set_image("image", image_view).map_err(|e| anyhow!("failed to show image: {}", e))?;

    let event_channel = window.event_channel().map_err(|e| anyhow!("failed to listen to window: {}", e))?;
    for window_event in event_channel {
        if is_exit_event(window_event) {
            break;
        }
    }
    return Ok(());
}

/// Renders the scene, saves it and optionally shows it in a window.
pub fn run(params: Params) -> Result<()> {
    let (frame, stats) = render(&params)?;
    log::info!(
        "{} models, {} triangles, {} pixels drawn",
        params.models.len(),
        stats.triangles,
        stats.pixels
    );

    frame
        .to_image()
        .save(&params.output)
        .with_context(|| format!("failed to write {}", params.output.display()))?;
    log::info!("wrote {}", params.output.display());
    if let Some(path) = &params.depth_output {
        frame
            .as_depth_image()
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("wrote {}", path.display());
    }

    if params.show_window {
        show(&params, &frame)?;
    }
    return Ok(());
}
