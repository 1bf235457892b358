//! Finds REW's Measure and Start buttons on the current screen and prints
//! where autosweep would click. Useful when calibrating the templates.

use autosweep::{
    args::LocateArgs,
    automation::{
        template::{best_match, load_gray},
        ControlTarget, Layout, ScreenDriver, ScreenPoint, XdoDriver,
    },
};
use clap::Parser;
use log::{info, warn};
use std::{error::Error, thread::sleep, time::Duration};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = LocateArgs::parse();

    let mut xdo = XdoDriver::new(&args.capture_command);
    let screen = xdo.screenshot()?;
    info!("Screen is {}x{}", screen.width(), screen.height());

    let layout = Layout::default();
    let mut points: Vec<(String, ScreenPoint)> = vec![];

    for target in [ControlTarget::MeasureButton, ControlTarget::StartButton] {
        let path = args.assets_dir.join(target.template_file());
        let template = load_gray(&path)?;
        match best_match(&screen, &template) {
            Some(m) if m.score >= args.confidence => {
                let (x, y) = m.center();
                let center = ScreenPoint::new(x as i32, y as i32);
                println!("{target}: {center} (score {:.3})", m.score);
                points.push((target.to_string(), center));

                if target == ControlTarget::StartButton {
                    let name = center.offset(layout.name_offset);
                    let notes = center.offset(layout.notes_offset);
                    println!("  name field:  {name}");
                    println!("  notes field: {notes}");
                    points.push(("name field".to_owned(), name));
                    points.push(("notes field".to_owned(), notes));
                }
            }
            Some(m) => println!(
                "{target}: not found, best score {:.3} is below {:.3}",
                m.score, args.confidence
            ),
            None => println!("{target}: not found, template larger than the screen"),
        }
    }

    if args.move_pointer {
        for (what, point) in points {
            info!("Moving to the {what}");
            if let Err(e) = xdo.move_to(point) {
                warn!("Could not move to the {what}: {e}");
            }
            sleep(Duration::from_secs(args.pause));
        }
    }
    Ok(())
}
