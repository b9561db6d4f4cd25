use std::{
    io::{BufReader, Read},
    path::{Path, PathBuf},
    time::Instant,
};

use digitnet::prelude::*;
use log::info;
use ndarray::Array2;

const SIDE: usize = 28;

//Classification example
pub fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        println!(
            r"
Files can be downloaded from https://www.kaggle.com/datasets/hojjatk/mnist-dataset
Or original from http://yann.lecun.com/exdb/mnist/
Extract the files
Pass in path of the *4* mnist files which have been extracted, and optionally a csv path for the history
cargo run --release --example mnist -- /tmp/mnist /tmp/history.csv
        "
        );
        return;
    }

    if let Err(e) = run(&args[1], args.get(2)) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run(path: &str, history_path: Option<&String>) -> digitnet::error::Result<()> {
    let mut rng = fastrand::Rng::with_seed(1);
    let tt = get_train_test(path)?;

    let mut nn = Network::new(SIDE * SIDE, 512, 512, 10, &mut rng)?;
    info!("{nn}");

    let start = Instant::now();
    let config = TrainConfig::new(32, 5);
    nn.train(&tt.train.0, &tt.train.1, &config, &mut rng)?;
    info!("trained in {:.2}s", start.elapsed().as_secs_f32());

    let test_out = nn.predict(&tt.test.0)?;
    let test_labels = to_one_hot(&tt.test.1)?;
    println!(
        "test loss:{} test acc:{}%",
        cross_entropy_loss(&test_labels, &test_out)?,
        accuracy(&test_out, &test_labels)? * 100.
    );

    //each column of W1 is what one first layer unit looks for
    let w1 = &nn.weights().w1;
    let last_loss = nn.history().last().map(|r| r.loss).unwrap_or_default();
    println!("W1 column 0, validation loss {last_loss}");
    print_mnist_ascii(w1.column(0).iter().copied());

    if let Some(p) = history_path {
        nn.history().save_csv(p)?;
        println!("history written to {p}");
    }
    Ok(())
}

struct TrainTest {
    train: (Array2<f64>, Vec<usize>),
    test: (Array2<f64>, Vec<usize>),
}

fn get_train_test(path: impl AsRef<Path>) -> std::io::Result<TrainTest> {
    // files are:
    // TRAIN_IMAGE "train-images.idx3-ubyte"
    // TRAIN_LABEL "train-labels.idx1-ubyte"
    // TEST_IMAGE:"t10k-images.idx3-ubyte"
    // TEST_LABEL:"t10k-labels.idx1-ubyte"
    // sometimes there are . instead of -, or vice versa, so we remove

    let mut label_path = PathBuf::new();
    let mut image_path = PathBuf::new();
    let mut test_label_path = PathBuf::new();
    let mut test_image_path = PathBuf::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let name = entry
            .file_name()
            .to_ascii_lowercase()
            .to_str()
            .unwrap_or_default()
            .replace(['-', '.'], "");
        match name.as_str() {
            "trainimagesidx3ubyte" => image_path = entry.path(),
            "trainlabelsidx1ubyte" => label_path = entry.path(),
            "t10kimagesidx3ubyte" => test_image_path = entry.path(),
            "t10klabelsidx1ubyte" => test_label_path = entry.path(),
            _ => {}
        }
    }

    info!("getting data");
    let train = load_image_label(&image_path, &label_path)?;
    let test = load_image_label(&test_image_path, &test_label_path)?;
    Ok(TrainTest { train, test })
}

fn read_all(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut br = BufReader::new(std::fs::File::open(path)?);
    let mut buf = Vec::new();
    br.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Pixels scaled to [0,1], one row per image
fn load_image_label(image_path: &Path, label_path: &Path) -> std::io::Result<(Array2<f64>, Vec<usize>)> {
    //skip magic number + count
    let labels: Vec<usize> = read_all(label_path)?
        .into_iter()
        .skip(8)
        .map(usize::from)
        .collect();

    //magic, count, rows, cols
    let pixels: Vec<f64> = read_all(image_path)?
        .into_iter()
        .skip(16)
        .map(|b| f64::from(b) / 255.)
        .collect();
    let count = pixels.len() / (SIDE * SIDE);
    let images = Array2::from_shape_vec((count, SIDE * SIDE), pixels)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    info!("got {} labels {} images", labels.len(), images.nrows());
    Ok((images, labels))
}

// Render 784 values as 28x28 ASCII art, darkest to brightest
fn print_mnist_ascii(values: impl Iterator<Item = f64>) {
    let values = values.collect::<Vec<_>>();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let shades = [' ', '.', ':', '-', '=', '+', '*', '#', '%', '@'];
    for row in values.chunks(SIDE) {
        let line: String = row
            .iter()
            .map(|v| {
                let scaled = if max > min { (v - min) / (max - min) } else { 0. };
                shades[(scaled * (shades.len() as f64 - 1.0)).round() as usize]
            })
            .collect();
        println!("{line}");
    }
}
